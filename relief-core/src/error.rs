use intake_registry::IntakeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReliefError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    MissingField { field: String, message: String },

    #[error("{0}")]
    DuplicateKey(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} is {current}, cannot move to {attempted}")]
    InvalidState {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    #[error("insufficient quantity: {available} available, {requested} requested")]
    InsufficientQuantity { available: u32, requested: u32 },

    #[error("{0}")]
    Mismatch(String),

    #[error("{0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, ReliefError>;

impl ReliefError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ReliefError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        current: impl std::fmt::Display,
        attempted: impl std::fmt::Display,
    ) -> Self {
        ReliefError::InvalidState {
            entity,
            current: current.to_string(),
            attempted: attempted.to_string(),
        }
    }
}

/// Human-readable message for a unique-constraint violation on `field`.
pub fn duplicate_key_message(field: &str) -> String {
    match field {
        "email" => "Email with this user already exists".into(),
        "phone" => "Phone Number with this user already exists".into(),
        "government_id" | "governmentId" | "gov_id" | "govId" => {
            "Government ID with this user already exists".into()
        }
        "registration_number" | "registrationNumber" => {
            "Registration number with this organization already exists".into()
        }
        other => format!("{other} already exists"),
    }
}

impl From<IntakeError> for ReliefError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Missing { field, message } => ReliefError::MissingField {
                field: field.to_string(),
                message: message.to_string(),
            },
            IntakeError::Invalid { message, .. } => ReliefError::Validation(message),
        }
    }
}

impl From<rusqlite::Error> for ReliefError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                if let Some(columns) = message.strip_prefix("UNIQUE constraint failed: ") {
                    let field = columns
                        .split(',')
                        .next()
                        .and_then(|c| c.trim().rsplit('.').next())
                        .unwrap_or(columns);
                    return ReliefError::DuplicateKey(duplicate_key_message(field));
                }
            }
        }
        ReliefError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for ReliefError {
    fn from(err: serde_json::Error) -> Self {
        ReliefError::Store(format!("document encoding: {err}"))
    }
}
