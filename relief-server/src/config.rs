use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DB_PATH: &str = "relief.db";

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub allocation_attempts: u32,
    pub incident_radius_km: f64,
    pub resource_radius_km: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: DEFAULT_DB_PATH.into(),
            allocation_attempts: 3,
            incident_radius_km: 5.0,
            resource_radius_km: 10.0,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            port: try_load("RELIEF_PORT", defaults.port),
            db_path: try_load("RELIEF_DB_PATH", defaults.db_path),
            allocation_attempts: try_load("RELIEF_ALLOCATION_RETRIES", defaults.allocation_attempts),
            incident_radius_km: try_load("RELIEF_INCIDENT_RADIUS_KM", defaults.incident_radius_km),
            resource_radius_km: try_load("RELIEF_RESOURCE_RADIUS_KM", defaults.resource_radius_km),
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = env::var(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_and_invalid_values_fall_back_to_defaults() {
        env::remove_var("RELIEF_TEST_UNSET");
        assert_eq!(try_load("RELIEF_TEST_UNSET", 7u32), 7);

        env::set_var("RELIEF_TEST_BAD_PORT", "not-a-port");
        assert_eq!(try_load("RELIEF_TEST_BAD_PORT", 5000u16), 5000);

        env::set_var("RELIEF_TEST_RADIUS", " 2.5 ");
        assert_eq!(try_load("RELIEF_TEST_RADIUS", 5.0f64), 2.5);
    }
}
