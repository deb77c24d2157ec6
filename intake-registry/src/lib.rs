use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const INCIDENT_TYPES: &[&str] = &[
    "medical",
    "fire",
    "flood",
    "earthquake",
    "storm",
    "infrastructure",
    "security",
    "trapped",
    "other",
];
pub const SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];
pub const RESOURCE_TYPES: &[&str] = &[
    "food",
    "water",
    "medical",
    "shelter",
    "clothing",
    "fuel",
    "communication",
    "other",
];
pub const ACTOR_KINDS: &[&str] = &["User", "Volunteer", "NGO"];
pub const MEDIA_KINDS: &[&str] = &["image", "video", "audio"];

/// A rejected inbound payload. Only the first offending field is reported.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IntakeError {
    #[error("{message}")]
    Missing {
        field: &'static str,
        message: &'static str,
    },
    #[error("{message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl IntakeError {
    pub fn field(&self) -> &'static str {
        match self {
            IntakeError::Missing { field, .. } | IntakeError::Invalid { field, .. } => field,
        }
    }

    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        IntakeError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Accepts either a GeoJSON point or a plain `{longitude, latitude}` pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationV1 {
    GeoJson {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        coordinates: Vec<f64>,
    },
    LonLat {
        longitude: f64,
        latitude: f64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressV1 {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub landmark: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pin_code: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidAddress {
    pub line1: String,
    pub line2: Option<String>,
    pub landmark: Option<String>,
    pub city: String,
    pub state: String,
    pub pin_code: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNeedV1 {
    pub resource_type: Option<String>,
    pub quantity: Option<i64>,
    pub details: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidResourceNeed {
    pub resource_type: String,
    pub quantity: u32,
    pub details: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MediaV1 {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub url: Option<String>,
    pub caption: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidMedia {
    pub kind: String,
    pub url: String,
    pub caption: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteV1 {
    pub text: Option<String>,
    pub added_by: Option<String>,
    pub added_by_model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidNote {
    pub text: String,
    pub author_id: String,
    pub author_kind: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentReportV1 {
    pub title: Option<String>,
    pub description: Option<String>,
    pub incident_type: Option<String>,
    pub severity: Option<String>,
    pub location: Option<LocationV1>,
    pub address: Option<AddressV1>,
    pub reported_by: Option<String>,
    pub people_affected: Option<i64>,
    #[serde(default, alias = "resourceNeeded")]
    pub resources_needed: Vec<ResourceNeedV1>,
    #[serde(default)]
    pub media: Vec<MediaV1>,
    #[serde(default)]
    pub notes: Vec<NoteV1>,
    pub managed_by: Option<String>,
    pub estimated_resolution_time: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidIncidentReport {
    pub title: String,
    pub description: String,
    pub incident_type: String,
    pub severity: String,
    pub location: Coordinates,
    pub address: ValidAddress,
    pub reported_by: String,
    pub people_affected: u32,
    pub resources_needed: Vec<ValidResourceNeed>,
    pub media: Vec<ValidMedia>,
    pub notes: Vec<ValidNote>,
    pub managed_by: Option<String>,
    pub estimated_resolution_time: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContactPersonV1 {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOfferV1 {
    pub name: Option<String>,
    pub description: Option<String>,
    pub resource_type: Option<String>,
    pub quantity: Option<i64>,
    pub available_quantity: Option<i64>,
    pub location: Option<LocationV1>,
    pub provided_by: Option<String>,
    pub contact_person: Option<ContactPersonV1>,
    pub available_until: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidResourceOffer {
    pub name: String,
    pub description: String,
    pub resource_type: String,
    pub quantity: u32,
    pub available_quantity: u32,
    pub location: Coordinates,
    pub provided_by: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub available_until: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterV1 {
    pub user_id: Option<String>,
    pub user_model: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequestV1 {
    pub requested_by: Option<RequesterV1>,
    pub related_incident: Option<String>,
    pub resource_type: Option<String>,
    pub quantity: Option<i64>,
    pub urgency: Option<String>,
    pub location: Option<LocationV1>,
    pub description: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidResourceRequest {
    pub requester_id: String,
    pub requester_kind: String,
    pub related_incident: Option<String>,
    pub resource_type: String,
    pub quantity: u32,
    pub urgency: String,
    pub location: Coordinates,
    pub description: String,
    pub notes: Option<String>,
}

pub fn validate_coordinates(longitude: f64, latitude: f64) -> Result<Coordinates, IntakeError> {
    let in_range = longitude.is_finite()
        && latitude.is_finite()
        && (-180.0..=180.0).contains(&longitude)
        && (-90.0..=90.0).contains(&latitude);
    if !in_range {
        return Err(IntakeError::invalid(
            "location",
            "Invalid coordinates. Use [longitude, latitude].",
        ));
    }
    Ok(Coordinates {
        longitude,
        latitude,
    })
}

pub fn validate_location(location: &LocationV1) -> Result<Coordinates, IntakeError> {
    match location {
        LocationV1::GeoJson { kind, coordinates } => {
            if let Some(kind) = kind {
                if kind != "Point" {
                    return Err(IntakeError::invalid(
                        "location",
                        format!("unsupported geometry type '{kind}'"),
                    ));
                }
            }
            match coordinates.as_slice() {
                [longitude, latitude] => validate_coordinates(*longitude, *latitude),
                _ => Err(IntakeError::invalid(
                    "location",
                    "Invalid coordinates. Use [longitude, latitude].",
                )),
            }
        }
        LocationV1::LonLat {
            longitude,
            latitude,
        } => validate_coordinates(*longitude, *latitude),
    }
}

pub fn validate_address_v1(address: &AddressV1) -> Result<ValidAddress, IntakeError> {
    let line1 = required_text(&address.line1, "address.line1", "Line 1 is required")?;
    let city = required_text(&address.city, "address.city", "City is required")?;
    let state = required_text(&address.state, "address.state", "State is required")?;
    let pin_code = match &address.pin_code {
        None | Some(serde_json::Value::Null) => {
            return Err(IntakeError::Missing {
                field: "address.pinCode",
                message: "Pin code is required",
            })
        }
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(_) => String::new(),
    };
    if pin_code.len() != 6 || !pin_code.chars().all(|c| c.is_ascii_digit()) {
        return Err(IntakeError::invalid(
            "address.pinCode",
            "Please enter a valid pin code",
        ));
    }

    Ok(ValidAddress {
        line1,
        line2: optional_text(&address.line2),
        landmark: optional_text(&address.landmark),
        city,
        state,
        pin_code,
    })
}

pub fn validate_incident_report_v1(
    report: &IncidentReportV1,
) -> Result<ValidIncidentReport, IntakeError> {
    let title = required_text(&report.title, "title", "Incident title is required")?;
    let description = required_text(&report.description, "description", "Description is required")?;
    let incident_type = required_text(
        &report.incident_type,
        "incidentType",
        "Incident type is required",
    )?;
    ensure_vocabulary(&incident_type, INCIDENT_TYPES, "incidentType", "incident type")?;
    let severity = required_text(&report.severity, "severity", "Severity level is required")?;
    ensure_vocabulary(&severity, SEVERITIES, "severity", "severity")?;

    let location = report.location.as_ref().ok_or(IntakeError::Missing {
        field: "location",
        message: "Location is required",
    })?;
    let location = validate_location(location)?;

    let address = report.address.as_ref().ok_or(IntakeError::Missing {
        field: "address",
        message: "Address is required",
    })?;
    let address = validate_address_v1(address)?;

    let reported_by = required_text(&report.reported_by, "reportedBy", "Reporter info is required")?;

    let people_affected = match report.people_affected {
        None => 1,
        Some(n) if n < 0 => {
            return Err(IntakeError::invalid(
                "peopleAffected",
                "Number of affected people cannot be negative",
            ))
        }
        Some(n) => u32::try_from(n)
            .map_err(|_| IntakeError::invalid("peopleAffected", "peopleAffected is too large"))?,
    };

    let mut resources_needed = Vec::with_capacity(report.resources_needed.len());
    for need in &report.resources_needed {
        let resource_type = required_text(
            &need.resource_type,
            "resourcesNeeded.resourceType",
            "Resource type is required",
        )?;
        ensure_vocabulary(
            &resource_type,
            RESOURCE_TYPES,
            "resourcesNeeded.resourceType",
            "resource type",
        )?;
        let quantity = positive_quantity(need.quantity, "resourcesNeeded.quantity")?;
        resources_needed.push(ValidResourceNeed {
            resource_type,
            quantity,
            details: optional_text(&need.details),
        });
    }

    let mut media = Vec::with_capacity(report.media.len());
    for item in &report.media {
        let kind = required_text(&item.kind, "media.type", "Media type is required")?;
        ensure_vocabulary(&kind, MEDIA_KINDS, "media.type", "media type")?;
        let url = required_text(&item.url, "media.url", "Media URL is required")?;
        if !is_http_url(&url) {
            return Err(IntakeError::invalid("media.url", "Invalid media URL"));
        }
        media.push(ValidMedia {
            kind,
            url,
            caption: optional_text(&item.caption),
        });
    }

    let mut notes = Vec::with_capacity(report.notes.len());
    for note in &report.notes {
        notes.push(validate_note_v1(note)?);
    }

    Ok(ValidIncidentReport {
        title,
        description,
        incident_type,
        severity,
        location,
        address,
        reported_by,
        people_affected,
        resources_needed,
        media,
        notes,
        managed_by: optional_text(&report.managed_by),
        estimated_resolution_time: optional_text(&report.estimated_resolution_time),
    })
}

pub fn validate_note_v1(note: &NoteV1) -> Result<ValidNote, IntakeError> {
    let text = required_text(&note.text, "notes.text", "Note text is required")?;
    let author_id = required_text(&note.added_by, "notes.addedBy", "Note author is required")?;
    let author_kind = required_text(
        &note.added_by_model,
        "notes.addedByModel",
        "Note author kind is required",
    )?;
    ensure_vocabulary(&author_kind, ACTOR_KINDS, "notes.addedByModel", "author kind")?;
    Ok(ValidNote {
        text,
        author_id,
        author_kind,
    })
}

pub fn validate_resource_offer_v1(
    offer: &ResourceOfferV1,
) -> Result<ValidResourceOffer, IntakeError> {
    let name = required_text(&offer.name, "name", "Resource name is required")?;
    let description = required_text(&offer.description, "description", "Description is required")?;
    let resource_type = required_text(
        &offer.resource_type,
        "resourceType",
        "Resource type is required",
    )?;
    ensure_vocabulary(&resource_type, RESOURCE_TYPES, "resourceType", "resource type")?;

    let quantity = non_negative(
        offer.quantity,
        "quantity",
        "Quantity is required",
        "Quantity cannot be negative",
    )?;
    let available_quantity = non_negative(
        offer.available_quantity,
        "availableQuantity",
        "Available quantity is required",
        "Available quantity cannot be negative",
    )?;
    if available_quantity > quantity {
        return Err(IntakeError::invalid(
            "availableQuantity",
            "Available quantity cannot exceed total quantity",
        ));
    }

    let location = offer.location.as_ref().ok_or(IntakeError::Missing {
        field: "location",
        message: "Location is required",
    })?;
    let location = validate_location(location)?;
    let provided_by = required_text(&offer.provided_by, "providedBy", "Provider is required")?;

    let contact = offer.contact_person.clone().unwrap_or_default();
    Ok(ValidResourceOffer {
        name,
        description,
        resource_type,
        quantity,
        available_quantity,
        location,
        provided_by,
        contact_name: optional_text(&contact.name),
        contact_phone: optional_text(&contact.phone),
        available_until: optional_text(&offer.available_until),
    })
}

/// Required fields are checked in a fixed order: requester id, requester
/// kind, resource type, quantity, location.
pub fn validate_resource_request_v1(
    request: &ResourceRequestV1,
) -> Result<ValidResourceRequest, IntakeError> {
    let requester = request.requested_by.clone().unwrap_or_default();
    let requester_id = required_text(
        &requester.user_id,
        "requestedBy.userId",
        "requestedBy.userId is required",
    )?;
    let requester_kind = required_text(
        &requester.user_model,
        "requestedBy.userModel",
        "requestedBy.userModel is required",
    )?;
    let resource_type = required_text(
        &request.resource_type,
        "resourceType",
        "resourceType is required",
    )?;
    let quantity = request.quantity.ok_or(IntakeError::Missing {
        field: "quantity",
        message: "quantity is required",
    })?;
    let location = request.location.as_ref().ok_or(IntakeError::Missing {
        field: "location",
        message: "location is required",
    })?;

    ensure_vocabulary(&requester_kind, ACTOR_KINDS, "requestedBy.userModel", "requester kind")?;
    ensure_vocabulary(&resource_type, RESOURCE_TYPES, "resourceType", "resource type")?;
    let quantity = positive_quantity(Some(quantity), "quantity")?;
    let location = validate_location(location)?;

    let urgency = optional_text(&request.urgency).unwrap_or_else(|| "medium".to_string());
    ensure_vocabulary(&urgency, SEVERITIES, "urgency", "urgency")?;

    Ok(ValidResourceRequest {
        requester_id,
        requester_kind,
        related_incident: optional_text(&request.related_incident),
        resource_type,
        quantity,
        urgency,
        location,
        description: request.description.clone().unwrap_or_default(),
        notes: optional_text(&request.notes),
    })
}

fn required_text(
    value: &Option<String>,
    field: &'static str,
    message: &'static str,
) -> Result<String, IntakeError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(IntakeError::Missing { field, message }),
    }
}

fn optional_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn ensure_vocabulary(
    value: &str,
    allowed: &[&str],
    field: &'static str,
    label: &str,
) -> Result<(), IntakeError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(IntakeError::invalid(field, format!("invalid {label} '{value}'")))
    }
}

fn positive_quantity(value: Option<i64>, field: &'static str) -> Result<u32, IntakeError> {
    match value {
        Some(n) if n >= 1 => {
            u32::try_from(n).map_err(|_| IntakeError::invalid(field, "Quantity is too large"))
        }
        _ => Err(IntakeError::invalid(field, "Quantity must be at least 1")),
    }
}

fn non_negative(
    value: Option<i64>,
    field: &'static str,
    missing: &'static str,
    negative: &'static str,
) -> Result<u32, IntakeError> {
    let n = value.ok_or(IntakeError::Missing {
        field,
        message: missing,
    })?;
    if n < 0 {
        return Err(IntakeError::invalid(field, negative));
    }
    u32::try_from(n).map_err(|_| IntakeError::invalid(field, "Quantity is too large"))
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split('/').next().unwrap_or_default();
            host.contains('.') && !host.starts_with('.') && !host.ends_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> IncidentReportV1 {
        serde_json::from_value(serde_json::json!({
            "title": "Flooded underpass",
            "description": "Water rising near the station",
            "incidentType": "flood",
            "severity": "high",
            "location": {"type": "Point", "coordinates": [72.8777, 19.076]},
            "address": {"line1": "Station Rd", "city": "Mumbai", "state": "MH", "pinCode": 400001},
            "reportedBy": "user-1",
            "peopleAffected": 8
        }))
        .expect("report json")
    }

    #[test]
    fn validates_incident_report_v1() {
        let valid = validate_incident_report_v1(&report()).expect("valid");
        assert_eq!(valid.location.longitude, 72.8777);
        assert_eq!(valid.address.pin_code, "400001");
        assert_eq!(valid.people_affected, 8);
    }

    #[test]
    fn first_missing_field_is_reported() {
        let mut r = report();
        r.title = None;
        r.severity = None;
        let err = validate_incident_report_v1(&r).expect_err("missing title");
        assert_eq!(err.field(), "title");
        assert_eq!(err.to_string(), "Incident title is required");
    }

    #[test]
    fn people_affected_defaults_to_one_and_rejects_negative() {
        let mut r = report();
        r.people_affected = None;
        assert_eq!(validate_incident_report_v1(&r).expect("valid").people_affected, 1);

        r.people_affected = Some(-3);
        let err = validate_incident_report_v1(&r).expect_err("negative");
        assert_eq!(err.field(), "peopleAffected");
    }

    #[test]
    fn lon_lat_location_is_accepted() {
        let loc: LocationV1 =
            serde_json::from_value(serde_json::json!({"longitude": 10.0, "latitude": -5.5}))
                .expect("location");
        let coords = validate_location(&loc).expect("valid");
        assert_eq!(coords.latitude, -5.5);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert!(validate_coordinates(181.0, 0.0).is_err());
        assert!(validate_coordinates(0.0, -90.5).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
        assert!(validate_coordinates(-180.0, 90.0).is_ok());
    }

    #[test]
    fn pin_code_must_be_six_digits() {
        let mut r = report();
        if let Some(address) = r.address.as_mut() {
            address.pin_code = Some(serde_json::json!("12a456"));
        }
        let err = validate_incident_report_v1(&r).expect_err("bad pin");
        assert_eq!(err.to_string(), "Please enter a valid pin code");
    }

    #[test]
    fn media_url_must_be_http() {
        let mut r = report();
        r.media.push(MediaV1 {
            kind: Some("image".into()),
            url: Some("ftp://example.org/a.png".into()),
            caption: None,
        });
        let err = validate_incident_report_v1(&r).expect_err("bad url");
        assert_eq!(err.to_string(), "Invalid media URL");
    }

    #[test]
    fn resource_offer_rejects_available_above_total() {
        let offer: ResourceOfferV1 = serde_json::from_value(serde_json::json!({
            "name": "Rice",
            "description": "50 kg sacks",
            "resourceType": "food",
            "quantity": 10,
            "availableQuantity": 12,
            "location": {"longitude": 77.2, "latitude": 28.6},
            "providedBy": "ngo-1"
        }))
        .expect("offer json");
        let err = validate_resource_offer_v1(&offer).expect_err("too many");
        assert_eq!(err.field(), "availableQuantity");
    }

    #[test]
    fn resource_request_missing_fields_follow_fixed_order() {
        let mut request = ResourceRequestV1::default();
        let err = validate_resource_request_v1(&request).expect_err("empty");
        assert_eq!(err.field(), "requestedBy.userId");

        request.requested_by = Some(RequesterV1 {
            user_id: Some("u-1".into()),
            user_model: Some("User".into()),
        });
        request.quantity = Some(3);
        let err = validate_resource_request_v1(&request).expect_err("no type");
        assert_eq!(err.field(), "resourceType");

        request.resource_type = Some("water".into());
        let err = validate_resource_request_v1(&request).expect_err("no location");
        assert_eq!(err.field(), "location");
    }

    #[test]
    fn resource_request_defaults_urgency_to_medium() {
        let request: ResourceRequestV1 = serde_json::from_value(serde_json::json!({
            "requestedBy": {"userId": "v-9", "userModel": "Volunteer"},
            "resourceType": "water",
            "quantity": 40,
            "location": {"type": "Point", "coordinates": [0.0, 0.0]}
        }))
        .expect("request json");
        let valid = validate_resource_request_v1(&request).expect("valid");
        assert_eq!(valid.urgency, "medium");
        assert_eq!(valid.description, "");
    }
}
