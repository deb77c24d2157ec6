use crate::error::{ReliefError, Result};
use crate::model::Severity;
use serde::{Deserialize, Serialize};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Incident priority on a 1–10 scale, 10 most urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub fn new(value: u8) -> Result<Self> {
        if (MIN_PRIORITY..=MAX_PRIORITY).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ReliefError::Validation(format!(
                "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {value}"
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = ReliefError;

    fn try_from(value: u8) -> Result<Self> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl Severity {
    pub fn weight(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 3,
            Severity::High => 7,
            Severity::Critical => 10,
        }
    }
}

fn crowd_adjustment(people_affected: u32) -> u8 {
    match people_affected {
        n if n > 10 => 2,
        6..=10 => 1,
        _ => 0,
    }
}

/// Severity weight plus a crowd adjustment, clamped to the priority scale.
pub fn compute_priority(severity: Severity, people_affected: u32) -> Priority {
    let raw = severity.weight() + crowd_adjustment(people_affected);
    Priority(raw.clamp(MIN_PRIORITY, MAX_PRIORITY))
}

/// What a single write touched, for deciding the resulting priority.
#[derive(Clone, Copy, Debug, Default)]
pub struct PriorityInputs {
    pub explicit: Option<u8>,
    pub severity_written: bool,
    pub people_written: bool,
}

/// An explicit priority in the write wins. Otherwise priority is derived
/// again only when severity or head count changed; untouched incidents keep
/// whatever they had.
pub fn resolve_priority(
    current: Priority,
    severity: Severity,
    people_affected: u32,
    inputs: PriorityInputs,
) -> Result<Priority> {
    if let Some(explicit) = inputs.explicit {
        return Priority::new(explicit);
    }
    if inputs.severity_written || inputs.people_written {
        return Ok(compute_priority(severity, people_affected));
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    #[test]
    fn formula_matches_weights_and_adjustment() {
        for severity in ALL {
            for people in [0u32, 1, 5, 6, 10, 11, 500] {
                let adjustment = if people > 10 {
                    2
                } else if people > 5 {
                    1
                } else {
                    0
                };
                let expected = (severity.weight() + adjustment).clamp(1, 10);
                let got = compute_priority(severity, people).value();
                assert_eq!(got, expected, "{severity:?} / {people}");
                assert!((1..=10).contains(&got));
            }
        }
    }

    #[test]
    fn critical_with_crowd_clamps_to_ten() {
        assert_eq!(compute_priority(Severity::Critical, 12).value(), 10);
    }

    #[test]
    fn boundaries_of_crowd_adjustment() {
        assert_eq!(compute_priority(Severity::Medium, 5).value(), 3);
        assert_eq!(compute_priority(Severity::Medium, 6).value(), 4);
        assert_eq!(compute_priority(Severity::Medium, 10).value(), 4);
        assert_eq!(compute_priority(Severity::Medium, 11).value(), 5);
        assert_eq!(compute_priority(Severity::Low, 0).value(), 1);
    }

    #[test]
    fn explicit_priority_overrides_recomputation() {
        let current = Priority::new(4).expect("priority");
        let resolved = resolve_priority(
            current,
            Severity::Critical,
            50,
            PriorityInputs {
                explicit: Some(2),
                severity_written: true,
                people_written: true,
            },
        )
        .expect("resolve");
        assert_eq!(resolved.value(), 2);
    }

    #[test]
    fn untouched_inputs_keep_current_priority() {
        let current = Priority::new(6).expect("priority");
        let resolved =
            resolve_priority(current, Severity::Low, 0, PriorityInputs::default()).expect("ok");
        assert_eq!(resolved, current);
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(11).is_err());
        assert!(serde_json::from_str::<Priority>("12").is_err());
    }
}
