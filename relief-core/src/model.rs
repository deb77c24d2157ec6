use crate::error::ReliefError;
use crate::geo::{GeoPoint, Located};
use crate::priority::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declares a closed vocabulary that travels as a fixed string on the wire
/// and in store columns.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ReliefError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(ReliefError::Validation(format!(
                        concat!("invalid ", $label, " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(Severity, "severity" {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

string_enum!(Urgency, "urgency" {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl Default for Urgency {
    fn default() -> Self {
        Urgency::Medium
    }
}

string_enum!(IncidentType, "incident type" {
    Medical => "medical",
    Fire => "fire",
    Flood => "flood",
    Earthquake => "earthquake",
    Storm => "storm",
    Infrastructure => "infrastructure",
    Security => "security",
    Trapped => "trapped",
    Other => "other",
});

string_enum!(IncidentStatus, "incident status" {
    Reported => "reported",
    Verified => "verified",
    InProgress => "inProgress",
    Resolved => "resolved",
    Closed => "closed",
    FalseAlarm => "falseAlarm",
});

string_enum!(AssignmentStatus, "assignment status" {
    Assigned => "assigned",
    Accepted => "accepted",
    Rejected => "rejected",
    Completed => "completed",
});

string_enum!(
    /// Kinds of supply. Each kind is counted in a fixed unit.
    ResourceType, "resource type" {
    Food => "food",
    Water => "water",
    Medical => "medical",
    Shelter => "shelter",
    Clothing => "clothing",
    Fuel => "fuel",
    Communication => "communication",
    Other => "other",
});

impl ResourceType {
    pub fn unit(&self) -> &'static str {
        match self {
            ResourceType::Food => "packets",
            ResourceType::Water => "liters",
            ResourceType::Medical => "kits",
            ResourceType::Shelter => "people capacity",
            ResourceType::Clothing => "sets",
            ResourceType::Fuel => "liters",
            ResourceType::Communication => "devices",
            ResourceType::Other => "units",
        }
    }
}

string_enum!(RequestStatus, "request status" {
    Pending => "pending",
    Approved => "approved",
    Allocated => "allocated",
    Fulfilled => "fulfilled",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

string_enum!(ActorKind, "actor kind" {
    User => "User",
    Volunteer => "Volunteer",
    Ngo => "NGO",
});

string_enum!(MediaKind, "media type" {
    Image => "image",
    Video => "video",
    Audio => "audio",
});

/// A reference to whoever acted: a citizen, a volunteer or an NGO.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn new(kind: ActorKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmark: Option<String>,
    pub city: String,
    pub state: String,
    pub pin_code: String,
}

impl From<intake_registry::ValidAddress> for Address {
    fn from(a: intake_registry::ValidAddress) -> Self {
        Self {
            line1: a.line1,
            line2: a.line2,
            landmark: a.landmark,
            city: a.city,
            state: a.state,
            pin_code: a.pin_code,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNeed {
    pub resource_type: ResourceType,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Media {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub text: String,
    pub added_by: Actor,
    pub added_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub volunteer: String,
    pub assigned_at: DateTime<Utc>,
    pub status: AssignmentStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub description: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub location: GeoPoint,
    pub address: Address,
    pub reported_by: String,
    pub people_affected: u32,
    pub resources_needed: Vec<ResourceNeed>,
    pub status: IncidentStatus,
    pub priority: Priority,
    pub assigned_to: Vec<Assignment>,
    pub managed_by: Option<String>,
    pub media: Vec<Media>,
    pub notes: Vec<Note>,
    pub is_active: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub estimated_resolution_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Located for Incident {
    fn key(&self) -> &str {
        &self.id
    }

    fn location(&self) -> GeoPoint {
        self.location
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPerson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub description: String,
    pub resource_type: ResourceType,
    pub quantity: u32,
    pub available_quantity: u32,
    pub location: GeoPoint,
    pub provided_by: String,
    pub contact_person: ContactPerson,
    /// `None` means the stock never expires.
    pub available_until: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub allocated_requests: Vec<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn unit(&self) -> &'static str {
        self.resource_type.unit()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.available_until.is_some_and(|until| until < now)
    }
}

impl Located for Resource {
    fn key(&self) -> &str {
        &self.id
    }

    fn location(&self) -> GeoPoint {
        self.location
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub id: String,
    pub requested_by: Actor,
    pub related_incident: Option<String>,
    pub resource_type: ResourceType,
    pub quantity: u32,
    pub urgency: Urgency,
    pub status: RequestStatus,
    pub location: GeoPoint,
    pub description: String,
    /// Resource the request was approved against; allocation must use it.
    pub target_resource: Option<String>,
    pub fulfilled_by: Option<String>,
    pub allocation_date: Option<DateTime<Utc>>,
    pub fulfilled_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Located for ResourceRequest {
    fn key(&self) -> &str {
        &self.id
    }

    fn location(&self) -> GeoPoint {
        self.location
    }
}

/// Minimal view of a registered NGO. Registration itself happens elsewhere.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NgoRecord {
    pub id: String,
    pub name: String,
    pub registration_number: String,
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
