//! Incident lifecycle: reporting, status transitions, volunteer assignment
//! and field notes.
//!
//! Status moves forward along `reported → verified → inProgress → resolved →
//! closed`, may skip ahead, and may divert to `falseAlarm` before work has
//! started. `closed` and `falseAlarm` are terminal. Every persisted operation
//! is a read-modify-write inside one store transaction, so a rejected change
//! leaves the stored incident untouched.

use crate::error::{ReliefError, Result};
use crate::geo::{GeoPoint, Nearby, ProximityQuery};
use crate::model::{
    Actor, Assignment, AssignmentStatus, Incident, IncidentStatus, IncidentType, Media,
    Note, ResourceNeed, Severity,
};
use crate::priority::{compute_priority, resolve_priority, PriorityInputs};
use crate::store::{IncidentFilter, Store};
use chrono::{DateTime, Utc};
use intake_registry::{IncidentReportV1, NoteV1, ValidIncidentReport};
use serde::Deserialize;
use std::str::FromStr;
use tracing::info;

/// Statuses hidden from proximity discovery.
pub const SETTLED_STATUSES: [IncidentStatus; 3] = [
    IncidentStatus::Closed,
    IncidentStatus::Resolved,
    IncidentStatus::FalseAlarm,
];

impl IncidentStatus {
    fn stage(&self) -> Option<u8> {
        match self {
            IncidentStatus::Reported => Some(0),
            IncidentStatus::Verified => Some(1),
            IncidentStatus::InProgress => Some(2),
            IncidentStatus::Resolved => Some(3),
            IncidentStatus::Closed => Some(4),
            IncidentStatus::FalseAlarm => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Closed | IncidentStatus::FalseAlarm)
    }

    /// Re-asserting the current status is always allowed and changes nothing.
    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self.stage(), next.stage()) {
            (Some(from), None) => from <= 1,
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

impl AssignmentStatus {
    pub fn can_transition_to(&self, next: AssignmentStatus) -> bool {
        matches!(
            (self, next),
            (AssignmentStatus::Assigned, AssignmentStatus::Accepted)
                | (AssignmentStatus::Assigned, AssignmentStatus::Rejected)
                | (AssignmentStatus::Accepted, AssignmentStatus::Completed)
                | (AssignmentStatus::Accepted, AssignmentStatus::Rejected)
        )
    }
}

/// A partial write to an incident. Absent fields are left as they are.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentUpdate {
    pub status: Option<IncidentStatus>,
    pub priority: Option<u8>,
    pub severity: Option<Severity>,
    pub people_affected: Option<u32>,
    pub managed_by: Option<String>,
    pub estimated_resolution_time: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn report(report: ValidIncidentReport, now: DateTime<Utc>) -> Result<Self> {
        let severity = Severity::from_str(&report.severity)?;
        let people_affected = report.people_affected;

        let resources_needed = report
            .resources_needed
            .into_iter()
            .map(|need| -> Result<ResourceNeed> {
                Ok(ResourceNeed {
                    resource_type: need.resource_type.parse()?,
                    quantity: need.quantity,
                    details: need.details,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let media = report
            .media
            .into_iter()
            .map(|m| -> Result<Media> {
                Ok(Media {
                    kind: m.kind.parse()?,
                    url: m.url,
                    caption: m.caption,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let notes = report
            .notes
            .into_iter()
            .map(|n| -> Result<Note> {
                Ok(Note {
                    text: n.text,
                    added_by: Actor::new(n.author_kind.parse()?, n.author_id),
                    added_at: now,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let estimated_resolution_time = report
            .estimated_resolution_time
            .as_deref()
            .map(parse_instant)
            .transpose()?;

        Ok(Incident {
            id: crate::model::new_id(),
            title: report.title,
            description: report.description,
            incident_type: IncidentType::from_str(&report.incident_type)?,
            severity,
            location: GeoPoint::try_from(report.location)?,
            address: report.address.into(),
            reported_by: report.reported_by,
            people_affected,
            resources_needed,
            status: IncidentStatus::Reported,
            priority: compute_priority(severity, people_affected),
            assigned_to: Vec::new(),
            managed_by: report.managed_by,
            media,
            notes,
            is_active: true,
            resolved_at: None,
            estimated_resolution_time,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_status(&mut self, next: IncidentStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ReliefError::invalid_state("incident", self.status, next));
        }
        if self.status == next {
            return Ok(());
        }

        self.status = next;
        if next == IncidentStatus::Resolved && self.resolved_at.is_none() {
            self.resolved_at = Some(now);
        }
        if next.is_terminal() {
            self.is_active = false;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.update_status(IncidentStatus::Resolved, now)
    }

    pub fn is_assigned(&self, volunteer_id: &str) -> bool {
        self.assigned_to.iter().any(|a| a.volunteer == volunteer_id)
    }

    pub fn assign_volunteer(&mut self, volunteer_id: &str, now: DateTime<Utc>) -> Result<()> {
        let volunteer_id = volunteer_id.trim();
        if volunteer_id.is_empty() {
            return Err(ReliefError::MissingField {
                field: "volunteerId".into(),
                message: "volunteerId is required".into(),
            });
        }
        if self.status.is_terminal() {
            return Err(ReliefError::invalid_state(
                "incident",
                self.status,
                "volunteer assignment",
            ));
        }
        if self.is_assigned(volunteer_id) {
            return Err(ReliefError::Validation(
                "Volunteer already assigned to this incident".into(),
            ));
        }

        self.assigned_to.push(Assignment {
            volunteer: volunteer_id.to_string(),
            assigned_at: now,
            status: AssignmentStatus::Assigned,
        });
        self.updated_at = now;
        Ok(())
    }

    pub fn update_assignment(
        &mut self,
        volunteer_id: &str,
        next: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let assignment = self
            .assigned_to
            .iter_mut()
            .find(|a| a.volunteer == volunteer_id)
            .ok_or_else(|| ReliefError::not_found("assignment", volunteer_id))?;
        if !assignment.status.can_transition_to(next) {
            return Err(ReliefError::invalid_state(
                "assignment",
                assignment.status,
                next,
            ));
        }
        assignment.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn add_note(&mut self, text: &str, author: Actor, now: DateTime<Utc>) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ReliefError::Validation("Note text is required".into()));
        }
        self.notes.push(Note {
            text: text.to_string(),
            added_by: author,
            added_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Applies a partial write. Nothing changes unless the whole update is
    /// acceptable.
    pub fn apply_update(&mut self, update: IncidentUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(ReliefError::invalid_state("incident", self.status, next));
            }
        }

        let severity = update.severity.unwrap_or(self.severity);
        let people_affected = update.people_affected.unwrap_or(self.people_affected);
        let priority = resolve_priority(
            self.priority,
            severity,
            people_affected,
            PriorityInputs {
                explicit: update.priority,
                severity_written: update.severity.is_some(),
                people_written: update.people_affected.is_some(),
            },
        )?;

        self.severity = severity;
        self.people_affected = people_affected;
        self.priority = priority;
        if let Some(managed_by) = update.managed_by {
            self.managed_by = Some(managed_by);
        }
        if let Some(eta) = update.estimated_resolution_time {
            self.estimated_resolution_time = Some(eta);
        }
        if let Some(next) = update.status {
            self.update_status(next, now)?;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// How a date bound was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Written {
    Instant,
    DateOnly,
}

fn parse_bound(value: &str) -> Result<(DateTime<Utc>, Written)> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok((at.with_timezone(&Utc), Written::Instant));
    }
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| (dt.and_utc(), Written::DateOnly))
        .ok_or_else(|| ReliefError::Validation(format!("invalid date '{value}'")))
}

/// Accepts RFC 3339 instants or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    parse_bound(value).map(|(at, _)| at)
}

/// Parses `start,end`. A bare end date covers that whole day; an explicit
/// end instant is used as given.
pub fn parse_date_range(value: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (start, end) = value
        .split_once(',')
        .ok_or_else(|| ReliefError::Validation("dateRange must be 'start,end'".into()))?;
    let start = parse_instant(start)?;
    let (mut end, written) = parse_bound(end)?;
    if written == Written::DateOnly {
        end = end + chrono::Duration::days(1) - chrono::Duration::microseconds(1);
    }
    if end < start {
        return Err(ReliefError::Validation(
            "dateRange end is before its start".into(),
        ));
    }
    Ok((start, end))
}

fn mutate_incident(
    store: &Store,
    id: &str,
    f: impl FnOnce(&mut Incident) -> Result<()>,
) -> Result<Incident> {
    store.write(|tx| {
        let mut incident = tx.incident(id)?;
        f(&mut incident)?;
        tx.save_incident(&incident)?;
        Ok(incident)
    })
}

pub fn report_incident(store: &Store, payload: &IncidentReportV1) -> Result<Incident> {
    let valid = intake_registry::validate_incident_report_v1(payload)?;
    if let Some(ngo) = &valid.managed_by {
        store.ensure_ngo(ngo)?;
    }
    let incident = Incident::report(valid, Utc::now())?;
    store.write(|tx| tx.save_incident(&incident))?;
    info!(
        incident_id = %incident.id,
        severity = %incident.severity,
        priority = incident.priority.value(),
        "incident reported"
    );
    Ok(incident)
}

pub fn get_incident(store: &Store, id: &str) -> Result<Incident> {
    store.incident(id)
}

/// Scalar filters run in the store; an optional proximity filter then keeps
/// only incidents inside the radius, nearest first.
pub fn list_incidents(
    store: &Store,
    filter: &IncidentFilter,
    near: Option<ProximityQuery>,
) -> Result<Vec<Incident>> {
    let incidents = store.incidents(filter)?;
    Ok(match near {
        Some(query) => query.rank(incidents).into_iter().map(|n| n.item).collect(),
        None => incidents,
    })
}

/// Open incidents within the query radius, nearest first.
pub fn nearby_incidents(store: &Store, query: &ProximityQuery) -> Result<Vec<Nearby<Incident>>> {
    let candidates = store.incidents_within(query.bounding_box(), &SETTLED_STATUSES)?;
    Ok(query.rank(candidates))
}

pub fn update_incident(store: &Store, id: &str, update: IncidentUpdate) -> Result<Incident> {
    if let Some(ngo) = &update.managed_by {
        store.ensure_ngo(ngo)?;
    }
    let incident = mutate_incident(store, id, |incident| incident.apply_update(update, Utc::now()))?;
    info!(incident_id = %id, status = %incident.status, priority = incident.priority.value(), "incident updated");
    Ok(incident)
}

pub fn update_status(store: &Store, id: &str, status: IncidentStatus) -> Result<Incident> {
    mutate_incident(store, id, |incident| incident.update_status(status, Utc::now()))
}

pub fn complete_incident(store: &Store, id: &str) -> Result<Incident> {
    let incident = mutate_incident(store, id, |incident| incident.complete(Utc::now()))?;
    info!(incident_id = %id, "incident resolved");
    Ok(incident)
}

pub fn assign_volunteer(store: &Store, id: &str, volunteer_id: &str) -> Result<Incident> {
    let incident = mutate_incident(store, id, |incident| {
        incident.assign_volunteer(volunteer_id, Utc::now())
    })?;
    info!(incident_id = %id, volunteer_id, "volunteer assigned");
    Ok(incident)
}

pub fn update_assignment(
    store: &Store,
    id: &str,
    volunteer_id: &str,
    status: AssignmentStatus,
) -> Result<Incident> {
    mutate_incident(store, id, |incident| {
        incident.update_assignment(volunteer_id, status, Utc::now())
    })
}

pub fn add_note(store: &Store, id: &str, payload: &NoteV1) -> Result<Incident> {
    let note = intake_registry::validate_note_v1(payload)?;
    let author = Actor::new(note.author_kind.parse()?, note.author_id);
    mutate_incident(store, id, |incident| {
        incident.add_note(&note.text, author, Utc::now())
    })
}
