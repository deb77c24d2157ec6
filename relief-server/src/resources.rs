use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use intake_registry::{ResourceOfferV1, ResourceRequestV1};
use relief_core::{
    geo::{round_km, GeoPoint, Nearby, ProximityQuery},
    ledger,
    model::{ContactPerson, Resource, ResourceRequest, ResourceType},
    requests,
    store::ResourceFilter,
    ReliefError,
};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

type Shared = State<Arc<AppState>>;

/// A resource as listed to clients: the stored record without its write
/// version, plus its counting unit and, for proximity results, the distance
/// in km.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceListing {
    pub id: String,
    pub name: String,
    pub description: String,
    pub resource_type: ResourceType,
    pub quantity: u32,
    pub available_quantity: u32,
    pub unit: &'static str,
    pub location: GeoPoint,
    pub provided_by: String,
    pub contact_person: ContactPerson,
    pub available_until: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub allocated_requests: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

impl From<Resource> for ResourceListing {
    fn from(resource: Resource) -> Self {
        let unit = resource.unit();
        let Resource {
            id,
            name,
            description,
            resource_type,
            quantity,
            available_quantity,
            location,
            provided_by,
            contact_person,
            available_until,
            last_updated,
            allocated_requests,
            version: _,
            created_at,
        } = resource;
        Self {
            id,
            name,
            description,
            resource_type,
            quantity,
            available_quantity,
            unit,
            location,
            provided_by,
            contact_person,
            available_until,
            last_updated,
            allocated_requests,
            created_at,
            distance: None,
        }
    }
}

impl From<Nearby<Resource>> for ResourceListing {
    fn from(hit: Nearby<Resource>) -> Self {
        Self {
            distance: Some(round_km(hit.distance_km)),
            ..Self::from(hit.item)
        }
    }
}

#[derive(Serialize)]
pub struct ResourceList {
    pub success: bool,
    pub count: usize,
    pub data: Vec<ResourceListing>,
}

impl<T: Into<ResourceListing>> FromIterator<T> for ResourceList {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let data: Vec<ResourceListing> = iter.into_iter().map(Into::into).collect();
        Self {
            success: true,
            count: data.len(),
            data,
        }
    }
}

#[derive(Serialize)]
pub struct ResourceEnvelope {
    pub success: bool,
    pub message: &'static str,
    pub resource: ResourceListing,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEnvelope {
    pub success: bool,
    pub message: &'static str,
    pub remaining_quantity: u32,
    pub request: ResourceRequest,
}

#[derive(Serialize)]
pub struct RequestEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub request: ResourceRequest,
}

impl RequestEnvelope {
    fn new(message: &'static str, request: ResourceRequest) -> Self {
        Self {
            success: true,
            message: Some(message),
            request,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuery {
    pub resource_type: Option<String>,
    pub min_available: Option<u32>,
    pub provided_by: Option<String>,
    pub available: Option<bool>,
}

impl ResourceQuery {
    fn filter(&self) -> Result<ResourceFilter, ReliefError> {
        Ok(ResourceFilter {
            resource_type: parse_type(self.resource_type.as_deref())?,
            min_available: self.min_available,
            provided_by: self.provided_by.clone().filter(|p| !p.is_empty()),
            unexpired_at: self.available.unwrap_or(true).then(Utc::now),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQuery {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub max_distance: Option<f64>,
    pub resource_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestockBody {
    pub amount: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateBody {
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    pub resource_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillBody {
    pub ngo_id: Option<String>,
}

fn parse_type(value: Option<&str>) -> Result<Option<ResourceType>, ReliefError> {
    value
        .filter(|v| !v.is_empty())
        .map(str::parse)
        .transpose()
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ReliefError> {
    value.ok_or_else(|| ReliefError::MissingField {
        field: field.into(),
        message: format!("{field} is required"),
    })
}

pub async fn add(
    State(state): Shared,
    payload: Result<Json<ResourceOfferV1>, JsonRejection>,
) -> Result<(StatusCode, Json<ResourceEnvelope>), AppError> {
    let Json(payload) = payload?;
    let resource = state
        .run(move |store| ledger::add_resource(store, &payload))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ResourceEnvelope {
            success: true,
            message: "Resource added successfully",
            resource: resource.into(),
        }),
    ))
}

pub async fn list(
    State(state): Shared,
    query: Result<Query<ResourceQuery>, QueryRejection>,
) -> Result<Json<ResourceList>, AppError> {
    let Query(query) = query?;
    let filter = query.filter()?;
    let resources = state
        .run(move |store| ledger::list_resources(store, &filter))
        .await?;
    Ok(Json(resources.into_iter().collect()))
}

pub async fn nearby(
    State(state): Shared,
    query: Result<Query<NearbyQuery>, QueryRejection>,
) -> Result<Json<ResourceList>, AppError> {
    let Query(query) = query?;
    let longitude = required(query.longitude, "longitude")?;
    let latitude = required(query.latitude, "latitude")?;
    let resource_type = parse_type(query.resource_type.as_deref())?;
    let center = GeoPoint::new(longitude, latitude)?;
    let proximity = ProximityQuery::new(
        center,
        query.max_distance.unwrap_or(state.config.resource_radius_km),
    )?;

    let hits = state
        .run(move |store| ledger::nearby_resources(store, &proximity, resource_type))
        .await?;
    Ok(Json(hits.into_iter().collect()))
}

pub async fn restock(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<RestockBody>, JsonRejection>,
) -> Result<Json<ResourceEnvelope>, AppError> {
    let Json(body) = body?;
    let amount = required(body.amount, "amount")?;
    let attempts = state.config.allocation_attempts;
    let resource = state
        .run(move |store| ledger::restock(store, &id, amount, attempts))
        .await?;
    Ok(Json(ResourceEnvelope {
        success: true,
        message: "Resource restocked successfully",
        resource: resource.into(),
    }))
}

pub async fn allocate(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<AllocateBody>, JsonRejection>,
) -> Result<Json<AllocationEnvelope>, AppError> {
    let Json(body) = body?;
    let request_id = required(body.request_id, "requestId")?;
    let attempts = state.config.allocation_attempts;
    let allocation = state
        .run(move |store| ledger::allocate(store, &id, &request_id, attempts))
        .await?;
    Ok(Json(AllocationEnvelope {
        success: true,
        message: "Resource allocated successfully",
        remaining_quantity: allocation.remaining_quantity,
        request: allocation.request,
    }))
}

pub async fn create_request(
    State(state): Shared,
    payload: Result<Json<ResourceRequestV1>, JsonRejection>,
) -> Result<(StatusCode, Json<RequestEnvelope>), AppError> {
    let Json(payload) = payload?;
    let request = state
        .run(move |store| requests::create_request(store, &payload))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RequestEnvelope::new(
            "Resource request created successfully",
            request,
        )),
    ))
}

pub async fn get_request(
    State(state): Shared,
    Path(id): Path<String>,
) -> Result<Json<RequestEnvelope>, AppError> {
    let request = state
        .run(move |store| requests::get_request(store, &id))
        .await?;
    Ok(Json(RequestEnvelope {
        success: true,
        message: None,
        request,
    }))
}

pub async fn approve_request(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<ApproveBody>, JsonRejection>,
) -> Result<Json<RequestEnvelope>, AppError> {
    let Json(body) = body?;
    let resource_id = required(body.resource_id, "resourceId")?;
    let request = state
        .run(move |store| requests::approve_request(store, &id, &resource_id))
        .await?;
    Ok(Json(RequestEnvelope::new("Resource request approved", request)))
}

pub async fn reject_request(
    State(state): Shared,
    Path(id): Path<String>,
    body: Option<Json<RejectBody>>,
) -> Result<Json<RequestEnvelope>, AppError> {
    let reason = body.and_then(|Json(body)| body.reason);
    let request = state
        .run(move |store| requests::reject_request(store, &id, reason.as_deref()))
        .await?;
    Ok(Json(RequestEnvelope::new("Resource request rejected", request)))
}

pub async fn cancel_request(
    State(state): Shared,
    Path(id): Path<String>,
) -> Result<Json<RequestEnvelope>, AppError> {
    let request = state
        .run(move |store| requests::cancel_request(store, &id))
        .await?;
    Ok(Json(RequestEnvelope::new("Resource request cancelled", request)))
}

pub async fn fulfill_request(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<FulfillBody>, JsonRejection>,
) -> Result<Json<RequestEnvelope>, AppError> {
    let Json(body) = body?;
    let ngo_id = required(body.ngo_id, "ngoId")?;
    let request = state
        .run(move |store| requests::fulfill_request(store, &id, &ngo_id))
        .await?;
    Ok(Json(RequestEnvelope::new("Resource request fulfilled", request)))
}

pub async fn match_candidates(
    State(state): Shared,
    Path(id): Path<String>,
) -> Result<Json<ResourceList>, AppError> {
    let hits = state
        .run(move |store| requests::match_candidates(store, &id))
        .await?;
    Ok(Json(hits.into_iter().collect()))
}
