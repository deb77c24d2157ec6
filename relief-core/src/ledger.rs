//! Resource inventory: offers, stock consumption and allocation against
//! approved requests.
//!
//! Stock changes are written with an optimistic version guard inside an
//! `IMMEDIATE` transaction. While every writer goes through
//! [`Store::write`] the transaction lock already serializes them and the
//! guard never trips; it only matters for writers that bypass that lock
//! (another process on the same file without `BEGIN IMMEDIATE`). A write
//! that loses such a race is retried a bounded number of times before
//! surfacing as [`ReliefError::Conflict`].

use crate::error::{ReliefError, Result};
use crate::geo::{GeoPoint, Nearby, ProximityQuery};
use crate::lifecycle::parse_instant;
use crate::model::{ContactPerson, RequestStatus, Resource, ResourceRequest, ResourceType};
use crate::store::{ResourceFilter, Store};
use chrono::{DateTime, Utc};
use intake_registry::{ResourceOfferV1, ValidResourceOffer};
use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

impl Resource {
    pub fn offer(offer: ValidResourceOffer, now: DateTime<Utc>) -> Result<Self> {
        let available_until = offer
            .available_until
            .as_deref()
            .map(parse_instant)
            .transpose()?;

        Ok(Resource {
            id: crate::model::new_id(),
            name: offer.name,
            description: offer.description,
            resource_type: offer.resource_type.parse()?,
            quantity: offer.quantity,
            available_quantity: offer.available_quantity,
            location: GeoPoint::try_from(offer.location)?,
            provided_by: offer.provided_by,
            contact_person: ContactPerson {
                name: offer.contact_name,
                phone: offer.contact_phone,
            },
            available_until,
            last_updated: now,
            allocated_requests: Vec::new(),
            version: 0,
            created_at: now,
        })
    }

    /// Takes `amount` out of available stock, or leaves the resource
    /// untouched if there is not enough.
    pub fn consume(&mut self, amount: u32) -> Result<()> {
        if self.available_quantity < amount {
            return Err(ReliefError::InsufficientQuantity {
                available: self.available_quantity,
                requested: amount,
            });
        }
        self.available_quantity -= amount;
        Ok(())
    }

    pub fn restock(&mut self, amount: u32, now: DateTime<Utc>) -> Result<()> {
        if amount == 0 {
            return Err(ReliefError::Validation(
                "Quantity must be at least 1".into(),
            ));
        }
        let (Some(quantity), Some(available)) = (
            self.quantity.checked_add(amount),
            self.available_quantity.checked_add(amount),
        ) else {
            return Err(ReliefError::Validation("restock amount is too large".into()));
        };
        self.quantity = quantity;
        self.available_quantity = available;
        self.last_updated = now;
        Ok(())
    }
}

/// Preconditions for allocating `resource` to `request`, in the order they
/// are reported.
pub fn check_allocation(resource: &Resource, request: &ResourceRequest) -> Result<()> {
    if request.status != RequestStatus::Approved {
        return Err(ReliefError::invalid_state(
            "resource request",
            request.status,
            RequestStatus::Allocated,
        ));
    }
    if request.target_resource.as_deref() != Some(resource.id.as_str()) {
        return Err(ReliefError::Mismatch(
            "Resource does not match the approved request".into(),
        ));
    }
    if resource.available_quantity < request.quantity {
        return Err(ReliefError::InsufficientQuantity {
            available: resource.available_quantity,
            requested: request.quantity,
        });
    }
    Ok(())
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub resource: Resource,
    pub request: ResourceRequest,
    pub remaining_quantity: u32,
}

/// Repeats `attempt` while it reports a lost race (`Ok(None)`).
fn with_retries<T>(
    what: &str,
    max_attempts: u32,
    mut attempt: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    let max_attempts = max_attempts.max(1);
    for n in 1..=max_attempts {
        if let Some(out) = attempt()? {
            return Ok(out);
        }
        warn!(attempt = n, max_attempts, "{what} lost a concurrent write race");
    }
    Err(ReliefError::Conflict(format!(
        "{what} conflicted with concurrent updates, please retry"
    )))
}

pub fn add_resource(store: &Store, payload: &ResourceOfferV1) -> Result<Resource> {
    let offer = intake_registry::validate_resource_offer_v1(payload)?;
    store.ensure_ngo(&offer.provided_by)?;
    let resource = Resource::offer(offer, Utc::now())?;
    store.write(|tx| tx.insert_resource(&resource))?;
    info!(
        resource_id = %resource.id,
        resource_type = %resource.resource_type,
        quantity = resource.quantity,
        "resource added"
    );
    Ok(resource)
}

/// Sorted by `lastUpdated`, most recent first.
pub fn list_resources(store: &Store, filter: &ResourceFilter) -> Result<Vec<Resource>> {
    store.resources(filter)
}

/// Unexpired resources within the query radius, nearest first.
pub fn nearby_resources(
    store: &Store,
    query: &ProximityQuery,
    resource_type: Option<ResourceType>,
) -> Result<Vec<Nearby<Resource>>> {
    let now = Utc::now();
    let candidates = store
        .resources_within(query.bounding_box(), resource_type)?
        .into_iter()
        .filter(|r| !r.is_expired_at(now));
    Ok(query.rank(candidates))
}

pub fn restock(store: &Store, resource_id: &str, amount: u32, max_attempts: u32) -> Result<Resource> {
    let resource = with_retries("restock", max_attempts, || {
        store.write(|tx| {
            let mut resource = tx.resource(resource_id)?;
            resource.restock(amount, Utc::now())?;
            Ok(tx.update_resource(&mut resource)?.then_some(resource))
        })
    })?;
    info!(resource_id, amount, available = resource.available_quantity, "resource restocked");
    Ok(resource)
}

/// Allocates an approved request against its target resource.
///
/// The resource decrement and the request transition commit together or not
/// at all.
pub fn allocate(
    store: &Store,
    resource_id: &str,
    request_id: &str,
    max_attempts: u32,
) -> Result<Allocation> {
    let allocation = with_retries("allocation", max_attempts, || {
        try_allocate(store, resource_id, request_id)
    })?;
    info!(
        resource_id,
        request_id,
        remaining = allocation.remaining_quantity,
        "resource allocated"
    );
    Ok(allocation)
}

fn try_allocate(store: &Store, resource_id: &str, request_id: &str) -> Result<Option<Allocation>> {
    store.write(|tx| {
        let mut resource = tx.resource(resource_id)?;
        let mut request = tx.request(request_id)?;
        check_allocation(&resource, &request)?;

        let now = Utc::now();
        resource.consume(request.quantity)?;
        resource.allocated_requests.push(request.id.clone());
        resource.last_updated = now;
        if !tx.update_resource(&mut resource)? {
            return Ok(None);
        }

        request.mark_allocated(now)?;
        tx.save_request(&request)?;

        Ok(Some(Allocation {
            remaining_quantity: resource.available_quantity,
            resource,
            request,
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, ActorKind, Urgency};
    use crate::store::tests::{open_store, seed_ngo};

    fn offer_payload(resource_type: &str, quantity: u32, lon: f64, lat: f64) -> ResourceOfferV1 {
        serde_json::from_value(serde_json::json!({
            "name": "Relief stock",
            "description": "Warehouse stock",
            "resourceType": resource_type,
            "quantity": quantity,
            "availableQuantity": quantity,
            "location": {"type": "Point", "coordinates": [lon, lat]},
            "providedBy": "ngo-1",
            "contactPerson": {"name": "Asha", "phone": "9876543210"}
        }))
        .expect("payload")
    }

    fn stocked(store: &Store, quantity: u32) -> Resource {
        seed_ngo(store, "ngo-1");
        add_resource(store, &offer_payload("water", quantity, 73.85, 18.52)).expect("add")
    }

    fn approved_request(store: &Store, resource: &Resource, quantity: u32) -> ResourceRequest {
        let now = Utc::now();
        let request = ResourceRequest {
            id: crate::model::new_id(),
            requested_by: Actor::new(ActorKind::User, "user-1"),
            related_incident: None,
            resource_type: resource.resource_type,
            quantity,
            urgency: Urgency::High,
            status: RequestStatus::Approved,
            location: resource.location,
            description: String::new(),
            target_resource: Some(resource.id.clone()),
            fulfilled_by: None,
            allocation_date: None,
            fulfilled_date: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        store.write(|tx| tx.save_request(&request)).expect("save request");
        request
    }

    #[test]
    fn offer_requires_known_ngo() {
        let store = open_store("offer-ngo");
        let err = add_resource(&store, &offer_payload("food", 10, 73.85, 18.52)).expect_err("no ngo");
        assert_eq!(err.to_string(), "Invalid NGO ID: No NGO found with this ID");
    }

    #[test]
    fn offer_is_stored_with_full_availability() {
        let store = open_store("offer-stored");
        let resource = stocked(&store, 40);
        assert_eq!(resource.available_quantity, 40);
        assert_eq!(resource.unit(), "liters");
        assert_eq!(store.resource(&resource.id).expect("stored"), resource);
    }

    #[test]
    fn allocation_decrements_and_then_refuses_overdraw() {
        let store = open_store("allocate");
        let resource = stocked(&store, 100);
        let first = approved_request(&store, &resource, 30);

        let allocation = allocate(&store, &resource.id, &first.id, 3).expect("allocate");
        assert_eq!(allocation.remaining_quantity, 70);
        assert_eq!(allocation.request.status, RequestStatus::Allocated);
        assert!(allocation.request.allocation_date.is_some());
        assert_eq!(allocation.resource.allocated_requests, vec![first.id.clone()]);

        let second = approved_request(&store, &resource, 80);
        let err = allocate(&store, &resource.id, &second.id, 3).expect_err("overdraw");
        assert!(matches!(
            err,
            ReliefError::InsufficientQuantity {
                available: 70,
                requested: 80
            }
        ));

        let stored = store.resource(&resource.id).expect("resource");
        assert_eq!(stored.available_quantity, 70);
        assert_eq!(stored.allocated_requests.len(), 1);
        assert_eq!(
            store.request(&second.id).expect("request").status,
            RequestStatus::Approved
        );
    }

    #[test]
    fn allocation_checks_state_before_target_before_quantity() {
        let store = open_store("allocate-order");
        let resource = stocked(&store, 5);
        let other = add_resource(&store, &offer_payload("water", 5, 73.85, 18.52)).expect("other");

        let mut pending = approved_request(&store, &resource, 50);
        pending.status = RequestStatus::Pending;
        store.write(|tx| tx.save_request(&pending)).expect("save");
        let err = allocate(&store, &resource.id, &pending.id, 3).expect_err("pending");
        assert!(matches!(err, ReliefError::InvalidState { ref current, .. } if current == "pending"));

        let approved = approved_request(&store, &resource, 50);
        let err = allocate(&store, &other.id, &approved.id, 3).expect_err("mismatch");
        assert!(matches!(err, ReliefError::Mismatch(_)));

        let err = allocate(&store, &resource.id, &approved.id, 3).expect_err("short");
        assert!(matches!(err, ReliefError::InsufficientQuantity { .. }));
    }

    #[test]
    fn allocation_of_missing_entities_is_not_found() {
        let store = open_store("allocate-missing");
        let resource = stocked(&store, 5);
        assert!(matches!(
            allocate(&store, "missing", "missing", 3),
            Err(ReliefError::NotFound { entity: "resource", .. })
        ));
        assert!(matches!(
            allocate(&store, &resource.id, "missing", 3),
            Err(ReliefError::NotFound { entity: "resource request", .. })
        ));
    }

    #[test]
    fn concurrent_allocations_never_overdraw() {
        let store = open_store("allocate-concurrent");
        let resource = stocked(&store, 100);
        let requests: Vec<_> = (0..6)
            .map(|_| approved_request(&store, &resource, 30))
            .collect();

        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let store = store.clone();
                let resource_id = resource.id.clone();
                std::thread::spawn(move || allocate(&store, &resource_id, &request.id, 5))
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            match handle.join().expect("thread") {
                Ok(_) => granted += 1,
                Err(ReliefError::InsufficientQuantity { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let stored = store.resource(&resource.id).expect("resource");
        assert_eq!(granted, 3);
        assert_eq!(stored.available_quantity, 10);
        assert_eq!(stored.allocated_requests.len(), 3);
    }

    #[test]
    fn restock_grows_both_quantities() {
        let store = open_store("restock");
        let resource = stocked(&store, 10);
        let request = approved_request(&store, &resource, 4);
        allocate(&store, &resource.id, &request.id, 3).expect("allocate");

        let restocked = restock(&store, &resource.id, 20, DEFAULT_WRITE_ATTEMPTS).expect("restock");
        assert_eq!(restocked.quantity, 30);
        assert_eq!(restocked.available_quantity, 26);
        assert!(restocked.version > resource.version);
        assert!(restock(&store, &resource.id, 0, DEFAULT_WRITE_ATTEMPTS).is_err());
    }

    #[test]
    fn stale_version_does_not_write() {
        let store = open_store("stale");
        let resource = stocked(&store, 10);
        let mut stale = resource.clone();
        restock(&store, &resource.id, 1, DEFAULT_WRITE_ATTEMPTS).expect("restock");

        stale.available_quantity = 0;
        let written = store
            .write(|tx| tx.update_resource(&mut stale))
            .expect("update");
        assert!(!written);
        assert_eq!(store.resource(&resource.id).expect("stored").available_quantity, 11);
    }

    #[test]
    fn nearby_resources_skip_expired_and_carry_distance() {
        let store = open_store("nearby-resources");
        seed_ngo(&store, "ngo-1");
        let fresh = add_resource(&store, &offer_payload("food", 10, 73.86, 18.52)).expect("fresh");

        let mut expired_payload = offer_payload("food", 10, 73.861, 18.52);
        expired_payload.available_until = Some("2000-01-01".into());
        add_resource(&store, &expired_payload).expect("expired");
        add_resource(&store, &offer_payload("water", 10, 73.86, 18.52)).expect("water");

        let center = GeoPoint::new(73.8567, 18.5204).expect("center");
        let query = ProximityQuery::new(center, 10.0).expect("query");
        let hits = nearby_resources(&store, &query, Some(ResourceType::Food)).expect("nearby");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.id, fresh.id);
        assert!(hits[0].distance_km < 1.0);

        let all = nearby_resources(&store, &query, None).expect("nearby");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn listing_filters_by_type_and_availability() {
        let store = open_store("list-resources");
        seed_ngo(&store, "ngo-1");
        add_resource(&store, &offer_payload("food", 3, 73.86, 18.52)).expect("small");
        let big = add_resource(&store, &offer_payload("food", 30, 73.86, 18.52)).expect("big");
        add_resource(&store, &offer_payload("fuel", 50, 73.86, 18.52)).expect("fuel");

        let listed = list_resources(
            &store,
            &ResourceFilter {
                resource_type: Some(ResourceType::Food),
                min_available: Some(10),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, big.id);
    }

    #[test]
    fn listing_hides_expired_stock_unless_asked() {
        let store = open_store("list-expired");
        seed_ngo(&store, "ngo-1");
        let fresh = add_resource(&store, &offer_payload("food", 5, 73.86, 18.52)).expect("fresh");
        let mut payload = offer_payload("food", 5, 73.86, 18.52);
        payload.available_until = Some("2000-01-01".into());
        let expired = add_resource(&store, &payload).expect("expired");

        let current = list_resources(
            &store,
            &ResourceFilter {
                unexpired_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .expect("list");
        let ids: Vec<_> = current.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![fresh.id.as_str()]);

        let everything = list_resources(&store, &ResourceFilter::default()).expect("list");
        assert_eq!(everything.len(), 2);
        assert!(everything.iter().any(|r| r.id == expired.id));
    }

    #[test]
    fn exhausted_retries_surface_as_conflict() {
        let mut calls = 0;
        let err = with_retries("allocation", 2, || {
            calls += 1;
            Ok(None::<()>)
        })
        .expect_err("never wins");
        assert!(matches!(err, ReliefError::Conflict(_)));
        assert_eq!(calls, 2);

        let won = with_retries("allocation", 3, || Ok(Some(7))).expect("first try");
        assert_eq!(won, 7);
    }
}
