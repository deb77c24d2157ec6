use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use intake_registry::{IncidentReportV1, NoteV1};
use relief_core::{
    geo::{GeoPoint, ProximityQuery},
    lifecycle::{self, parse_date_range, IncidentUpdate},
    model::{AssignmentStatus, Incident},
    store::IncidentFilter,
    ReliefError,
};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

type Shared = State<Arc<AppState>>;

#[derive(Serialize)]
pub struct IncidentEnvelope {
    pub message: &'static str,
    pub incident: Incident,
}

#[derive(Serialize)]
pub struct IncidentDetail {
    pub incident: Incident,
}

#[derive(Serialize)]
pub struct IncidentList {
    pub count: usize,
    pub incidents: Vec<Incident>,
}

impl IncidentList {
    fn new(incidents: Vec<Incident>) -> Self {
        Self {
            count: incidents.len(),
            incidents,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub incident_type: Option<String>,
    pub date_range: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub radius: Option<f64>,
}

impl IncidentQuery {
    fn filter(&self) -> Result<IncidentFilter, ReliefError> {
        let mut filter = IncidentFilter {
            status: parse_filter(self.status.as_deref())?,
            severity: parse_filter(self.severity.as_deref())?,
            incident_type: parse_filter(self.incident_type.as_deref())?,
            ..Default::default()
        };
        if let Some(range) = self.date_range.as_deref() {
            let (from, to) = parse_date_range(range)?;
            filter.created_from = Some(from);
            filter.created_to = Some(to);
        }
        Ok(filter)
    }

    fn near(&self, default_radius_km: f64) -> Result<Option<ProximityQuery>, ReliefError> {
        match (self.longitude, self.latitude) {
            (Some(longitude), Some(latitude)) => {
                let center = GeoPoint::new(longitude, latitude)?;
                let radius = self.radius.unwrap_or(default_radius_km);
                Ok(Some(ProximityQuery::new(center, radius)?))
            }
            (None, None) => Ok(None),
            _ => Err(ReliefError::Validation(
                "longitude and latitude must be given together".into(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NearbyBody {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    pub volunteer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentBody {
    pub status: AssignmentStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteBody {
    pub text: Option<String>,
    pub author_id: Option<String>,
    pub author_kind: Option<String>,
}

impl From<NoteBody> for NoteV1 {
    fn from(body: NoteBody) -> Self {
        NoteV1 {
            text: body.text,
            added_by: body.author_id,
            added_by_model: body.author_kind,
        }
    }
}

/// An empty query value filters nothing.
fn parse_filter<T>(value: Option<&str>) -> Result<Option<T>, ReliefError>
where
    T: FromStr<Err = ReliefError>,
{
    value.filter(|v| !v.is_empty()).map(str::parse).transpose()
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ReliefError> {
    value.ok_or_else(|| ReliefError::MissingField {
        field: field.into(),
        message: format!("{field} is required"),
    })
}

pub async fn report(
    State(state): Shared,
    payload: Result<Json<IncidentReportV1>, JsonRejection>,
) -> Result<(StatusCode, Json<IncidentEnvelope>), AppError> {
    let Json(payload) = payload?;
    let incident = state
        .run(move |store| lifecycle::report_incident(store, &payload))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(IncidentEnvelope {
            message: "Incident reported successfully",
            incident,
        }),
    ))
}

pub async fn list(
    State(state): Shared,
    query: Result<Query<IncidentQuery>, QueryRejection>,
) -> Result<Json<IncidentList>, AppError> {
    let Query(query) = query?;
    let filter = query.filter()?;
    let near = query.near(state.config.incident_radius_km)?;
    let incidents = state
        .run(move |store| lifecycle::list_incidents(store, &filter, near))
        .await?;
    Ok(Json(IncidentList::new(incidents)))
}

pub async fn nearby(
    State(state): Shared,
    body: Result<Json<NearbyBody>, JsonRejection>,
) -> Result<Json<IncidentList>, AppError> {
    let Json(body) = body?;
    let latitude = required(body.latitude, "latitude")?;
    let longitude = required(body.longitude, "longitude")?;
    let center = GeoPoint::new(longitude, latitude)?;
    let query = ProximityQuery::new(center, body.radius.unwrap_or(state.config.incident_radius_km))?;

    let hits = state
        .run(move |store| lifecycle::nearby_incidents(store, &query))
        .await?;
    Ok(Json(IncidentList::new(
        hits.into_iter().map(|hit| hit.item).collect(),
    )))
}

pub async fn get_one(
    State(state): Shared,
    Path(id): Path<String>,
) -> Result<Json<IncidentDetail>, AppError> {
    let incident = state
        .run(move |store| lifecycle::get_incident(store, &id))
        .await?;
    Ok(Json(IncidentDetail { incident }))
}

pub async fn update(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<IncidentUpdate>, JsonRejection>,
) -> Result<Json<IncidentEnvelope>, AppError> {
    let Json(update) = body?;
    let incident = state
        .run(move |store| lifecycle::update_incident(store, &id, update))
        .await?;
    Ok(Json(IncidentEnvelope {
        message: "Incident updated successfully",
        incident,
    }))
}

pub async fn assign(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<AssignBody>, JsonRejection>,
) -> Result<Json<IncidentEnvelope>, AppError> {
    let Json(body) = body?;
    let volunteer_id = required(body.volunteer_id, "volunteerId")?;
    let incident = state
        .run(move |store| lifecycle::assign_volunteer(store, &id, &volunteer_id))
        .await?;
    Ok(Json(IncidentEnvelope {
        message: "Volunteer assigned successfully",
        incident,
    }))
}

pub async fn update_assignment(
    State(state): Shared,
    Path((id, volunteer_id)): Path<(String, String)>,
    body: Result<Json<AssignmentBody>, JsonRejection>,
) -> Result<Json<IncidentEnvelope>, AppError> {
    let Json(body) = body?;
    let incident = state
        .run(move |store| lifecycle::update_assignment(store, &id, &volunteer_id, body.status))
        .await?;
    Ok(Json(IncidentEnvelope {
        message: "Assignment updated successfully",
        incident,
    }))
}

pub async fn add_note(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<NoteBody>, JsonRejection>,
) -> Result<(StatusCode, Json<IncidentEnvelope>), AppError> {
    let Json(body) = body?;
    let note = NoteV1::from(body);
    let incident = state
        .run(move |store| lifecycle::add_note(store, &id, &note))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(IncidentEnvelope {
            message: "Note added successfully",
            incident,
        }),
    ))
}

pub async fn complete(
    State(state): Shared,
    Path(id): Path<String>,
) -> Result<Json<IncidentEnvelope>, AppError> {
    let incident = state
        .run(move |store| lifecycle::complete_incident(store, &id))
        .await?;
    Ok(Json(IncidentEnvelope {
        message: "Incident marked as resolved",
        incident,
    }))
}
