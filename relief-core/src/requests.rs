//! Resource requests and their approval workflow.
//!
//! `pending → approved → allocated → fulfilled`, with `rejected` and
//! `cancelled` as exits before allocation. Allocation itself lives in the
//! ledger because it has to move stock in the same transaction.

use crate::error::{ReliefError, Result};
use crate::geo::{nearest_first, GeoPoint, Nearby};
use crate::model::{Actor, RequestStatus, Resource, ResourceRequest};
use crate::store::{ResourceFilter, Store};
use chrono::{DateTime, Utc};
use intake_registry::{ResourceRequestV1, ValidResourceRequest};
use tracing::info;

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Fulfilled | RequestStatus::Rejected | RequestStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Allocated)
                | (Approved, Rejected)
                | (Approved, Cancelled)
                | (Allocated, Fulfilled)
        )
    }
}

impl ResourceRequest {
    pub fn from_intake(valid: ValidResourceRequest, now: DateTime<Utc>) -> Result<Self> {
        Ok(ResourceRequest {
            id: crate::model::new_id(),
            requested_by: Actor::new(valid.requester_kind.parse()?, valid.requester_id),
            related_incident: valid.related_incident,
            resource_type: valid.resource_type.parse()?,
            quantity: valid.quantity,
            urgency: valid.urgency.parse()?,
            status: RequestStatus::Pending,
            location: GeoPoint::try_from(valid.location)?,
            description: valid.description,
            target_resource: None,
            fulfilled_by: None,
            allocation_date: None,
            fulfilled_date: None,
            notes: valid.notes,
            created_at: now,
            updated_at: now,
        })
    }

    fn transition(&mut self, next: RequestStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ReliefError::invalid_state("resource request", self.status, next));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Approves the request against a specific resource of the same type.
    pub fn approve(&mut self, resource: &Resource, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(RequestStatus::Approved) {
            return Err(ReliefError::invalid_state(
                "resource request",
                self.status,
                RequestStatus::Approved,
            ));
        }
        if resource.resource_type != self.resource_type {
            return Err(ReliefError::Mismatch(format!(
                "Request is for {} but resource {} holds {}",
                self.resource_type, resource.id, resource.resource_type
            )));
        }
        self.transition(RequestStatus::Approved, now)?;
        self.target_resource = Some(resource.id.clone());
        Ok(())
    }

    pub fn reject(&mut self, reason: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::Rejected, now)?;
        if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
            let line = format!("Rejected: {reason}");
            self.notes = Some(match self.notes.take() {
                Some(existing) => format!("{existing}\n{line}"),
                None => line,
            });
        }
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::Cancelled, now)
    }

    pub fn mark_allocated(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::Allocated, now)?;
        self.allocation_date = Some(now);
        Ok(())
    }

    pub fn fulfill(&mut self, ngo_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::Fulfilled, now)?;
        self.fulfilled_date.get_or_insert(now);
        self.fulfilled_by = Some(ngo_id.to_string());
        Ok(())
    }
}

fn mutate_request(
    store: &Store,
    id: &str,
    f: impl FnOnce(&mut ResourceRequest) -> Result<()>,
) -> Result<ResourceRequest> {
    store.write(|tx| {
        let mut request = tx.request(id)?;
        f(&mut request)?;
        tx.save_request(&request)?;
        Ok(request)
    })
}

pub fn create_request(store: &Store, payload: &ResourceRequestV1) -> Result<ResourceRequest> {
    let valid = intake_registry::validate_resource_request_v1(payload)?;
    let request = ResourceRequest::from_intake(valid, Utc::now())?;
    store.write(|tx| {
        if let Some(incident_id) = &request.related_incident {
            tx.incident(incident_id)?;
        }
        tx.save_request(&request)
    })?;
    info!(
        request_id = %request.id,
        resource_type = %request.resource_type,
        quantity = request.quantity,
        urgency = %request.urgency,
        "resource request created"
    );
    Ok(request)
}

pub fn get_request(store: &Store, id: &str) -> Result<ResourceRequest> {
    store.request(id)
}

pub fn approve_request(store: &Store, id: &str, resource_id: &str) -> Result<ResourceRequest> {
    let request = store.write(|tx| {
        let resource = tx.resource(resource_id)?;
        let mut request = tx.request(id)?;
        request.approve(&resource, Utc::now())?;
        tx.save_request(&request)?;
        Ok(request)
    })?;
    info!(request_id = %id, resource_id, "resource request approved");
    Ok(request)
}

pub fn reject_request(store: &Store, id: &str, reason: Option<&str>) -> Result<ResourceRequest> {
    mutate_request(store, id, |request| request.reject(reason, Utc::now()))
}

pub fn cancel_request(store: &Store, id: &str) -> Result<ResourceRequest> {
    mutate_request(store, id, |request| request.cancel(Utc::now()))
}

pub fn fulfill_request(store: &Store, id: &str, ngo_id: &str) -> Result<ResourceRequest> {
    let request = store.write(|tx| {
        tx.ensure_ngo(ngo_id)?;
        let mut request = tx.request(id)?;
        request.fulfill(ngo_id, Utc::now())?;
        tx.save_request(&request)?;
        Ok(request)
    })?;
    info!(request_id = %id, ngo_id, "resource request fulfilled");
    Ok(request)
}

/// Unexpired resources of the requested type that can cover the whole
/// quantity, nearest to the request first.
pub fn match_candidates(store: &Store, id: &str) -> Result<Vec<Nearby<Resource>>> {
    let request = store.request(id)?;
    let candidates = store.resources(&ResourceFilter {
        resource_type: Some(request.resource_type),
        min_available: Some(request.quantity),
        provided_by: None,
        unexpired_at: Some(Utc::now()),
    })?;
    Ok(nearest_first(request.location, candidates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{add_resource, allocate, DEFAULT_WRITE_ATTEMPTS};
    use crate::model::{ActorKind, Urgency};
    use crate::store::tests::{open_store, seed_ngo};
    use intake_registry::ResourceOfferV1;

    fn request_payload(body: serde_json::Value) -> ResourceRequestV1 {
        serde_json::from_value(body).expect("payload")
    }

    fn water_request(quantity: u32) -> ResourceRequestV1 {
        request_payload(serde_json::json!({
            "requestedBy": {"userId": "user-1", "userModel": "User"},
            "resourceType": "water",
            "quantity": quantity,
            "location": {"type": "Point", "coordinates": [73.8567, 18.5204]}
        }))
    }

    fn water_stock(store: &Store, quantity: u32, lon: f64) -> Resource {
        let offer: ResourceOfferV1 = serde_json::from_value(serde_json::json!({
            "name": "Tanker",
            "description": "Drinking water",
            "resourceType": "water",
            "quantity": quantity,
            "availableQuantity": quantity,
            "location": {"type": "Point", "coordinates": [lon, 18.52]},
            "providedBy": "ngo-1"
        }))
        .expect("offer");
        add_resource(store, &offer).expect("add")
    }

    #[test]
    fn created_request_is_pending_with_defaults() {
        let store = open_store("request-create");
        let request = create_request(&store, &water_request(10)).expect("create");
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.urgency, Urgency::Medium);
        assert_eq!(request.description, "");
        assert_eq!(request.requested_by, Actor::new(ActorKind::User, "user-1"));
        assert_eq!(store.request(&request.id).expect("stored"), request);
    }

    #[test]
    fn missing_fields_are_reported_in_order() {
        let store = open_store("request-missing");
        let err = create_request(
            &store,
            &request_payload(serde_json::json!({"requestedBy": {"userId": "u"}})),
        )
        .expect_err("missing kind");
        assert!(
            matches!(err, ReliefError::MissingField { ref field, .. } if field == "requestedBy.userModel")
        );

        let err = create_request(
            &store,
            &request_payload(serde_json::json!({
                "requestedBy": {"userId": "u", "userModel": "User"},
                "resourceType": "food"
            })),
        )
        .expect_err("missing quantity");
        assert!(matches!(err, ReliefError::MissingField { ref field, .. } if field == "quantity"));
    }

    #[test]
    fn related_incident_must_exist() {
        let store = open_store("request-incident");
        let mut payload = water_request(5);
        payload.related_incident = Some("ghost".into());
        let err = create_request(&store, &payload).expect_err("unknown incident");
        assert!(matches!(err, ReliefError::NotFound { entity: "incident", .. }));
    }

    #[test]
    fn full_workflow_through_fulfilment() {
        let store = open_store("request-flow");
        seed_ngo(&store, "ngo-1");
        let resource = water_stock(&store, 100, 73.86);
        let request = create_request(&store, &water_request(30)).expect("create");

        let approved = approve_request(&store, &request.id, &resource.id).expect("approve");
        assert_eq!(approved.target_resource.as_deref(), Some(resource.id.as_str()));

        allocate(&store, &resource.id, &request.id, DEFAULT_WRITE_ATTEMPTS).expect("allocate");

        let fulfilled = fulfill_request(&store, &request.id, "ngo-1").expect("fulfill");
        assert_eq!(fulfilled.status, RequestStatus::Fulfilled);
        assert_eq!(fulfilled.fulfilled_by.as_deref(), Some("ngo-1"));
        let stamp = fulfilled.fulfilled_date.expect("stamped");

        let err = fulfill_request(&store, &request.id, "ngo-1").expect_err("twice");
        assert!(matches!(err, ReliefError::InvalidState { .. }));
        assert_eq!(
            store.request(&request.id).expect("stored").fulfilled_date,
            Some(stamp)
        );
    }

    #[test]
    fn approval_requires_matching_type() {
        let store = open_store("request-mismatch");
        seed_ngo(&store, "ngo-1");
        let resource = water_stock(&store, 10, 73.86);
        let request = create_request(
            &store,
            &request_payload(serde_json::json!({
                "requestedBy": {"userId": "v-1", "userModel": "Volunteer"},
                "resourceType": "food",
                "quantity": 2,
                "location": {"longitude": 73.85, "latitude": 18.52}
            })),
        )
        .expect("create");

        let err = approve_request(&store, &request.id, &resource.id).expect_err("mismatch");
        assert!(matches!(err, ReliefError::Mismatch(_)));
        assert_eq!(
            store.request(&request.id).expect("stored").status,
            RequestStatus::Pending
        );
    }

    #[test]
    fn rejected_and_cancelled_are_final() {
        let store = open_store("request-terminal");
        let rejected = create_request(&store, &water_request(1)).expect("create");
        let out = reject_request(&store, &rejected.id, Some("duplicate")).expect("reject");
        assert_eq!(out.notes.as_deref(), Some("Rejected: duplicate"));
        assert!(out.status.is_terminal());
        assert!(cancel_request(&store, &rejected.id).is_err());

        let cancelled = create_request(&store, &water_request(1)).expect("create");
        cancel_request(&store, &cancelled.id).expect("cancel");
        assert!(matches!(
            reject_request(&store, &cancelled.id, None),
            Err(ReliefError::InvalidState { .. })
        ));
    }

    #[test]
    fn fulfil_requires_known_ngo_and_allocation() {
        let store = open_store("request-fulfil");
        seed_ngo(&store, "ngo-1");
        let request = create_request(&store, &water_request(1)).expect("create");
        assert!(matches!(
            fulfill_request(&store, &request.id, "ngo-1"),
            Err(ReliefError::InvalidState { .. })
        ));
        assert!(matches!(
            fulfill_request(&store, &request.id, "ngo-404"),
            Err(ReliefError::Validation(_))
        ));
    }

    #[test]
    fn candidates_are_same_type_sufficient_and_nearest_first() {
        let store = open_store("request-match");
        seed_ngo(&store, "ngo-1");
        let far = water_stock(&store, 50, 74.2);
        let near = water_stock(&store, 50, 73.857);
        water_stock(&store, 5, 73.8568);

        let request = create_request(&store, &water_request(20)).expect("create");
        let ids: Vec<_> = match_candidates(&store, &request.id)
            .expect("match")
            .into_iter()
            .map(|n| n.item.id)
            .collect();
        assert_eq!(ids, vec![near.id, far.id]);
    }
}
