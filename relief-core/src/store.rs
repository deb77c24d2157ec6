use crate::error::{ReliefError, Result};
use crate::geo::BoundingBox;
use crate::model::{
    Incident, IncidentStatus, IncidentType, NgoRecord, Resource, ResourceRequest, ResourceType,
    Severity,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed persistence for incidents, resources and resource requests.
///
/// Each aggregate is stored as one JSON document next to the scalar columns
/// used for filtering and proximity prefilters. A connection is opened per
/// operation; every mutation runs in an `IMMEDIATE` transaction so writers
/// against the same row are serialized.
#[derive(Clone, Debug)]
pub struct Store {
    db_path: Arc<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub incident_type: Option<IncidentType>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct ResourceFilter {
    pub resource_type: Option<ResourceType>,
    pub min_available: Option<u32>,
    pub provided_by: Option<String>,
    /// Excludes stock whose `availableUntil` lies before this instant.
    pub unexpired_at: Option<DateTime<Utc>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let db_path = PathBuf::from(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ReliefError::Store(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS ngos (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                registration_number TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                severity TEXT NOT NULL,
                incident_type TEXT NOT NULL,
                priority INTEGER NOT NULL,
                longitude REAL NOT NULL,
                latitude REAL NOT NULL,
                created_at TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_status_priority ON incidents(status, priority DESC);
            CREATE INDEX IF NOT EXISTS idx_incidents_geo ON incidents(latitude, longitude);
            CREATE INDEX IF NOT EXISTS idx_incidents_created ON incidents(created_at);
            CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                resource_type TEXT NOT NULL,
                provided_by TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                available_quantity INTEGER NOT NULL
                    CHECK (available_quantity >= 0 AND available_quantity <= quantity),
                available_until TEXT,
                last_updated TEXT NOT NULL,
                longitude REAL NOT NULL,
                latitude REAL NOT NULL,
                version INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_resources_type ON resources(resource_type, available_quantity);
            CREATE INDEX IF NOT EXISTS idx_resources_geo ON resources(latitude, longitude);
            CREATE INDEX IF NOT EXISTS idx_resources_provider ON resources(provided_by);
            CREATE TABLE IF NOT EXISTS resource_requests (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                related_incident TEXT,
                target_resource TEXT,
                created_at TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_requests_status ON resource_requests(status);
            CREATE INDEX IF NOT EXISTS idx_requests_incident ON resource_requests(related_incident);
            ",
        )?;

        Ok(Self {
            db_path: Arc::new(db_path),
        })
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Runs `f` inside an `IMMEDIATE` transaction. Commits when `f` returns
    /// `Ok`, rolls back otherwise.
    pub fn write<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&StoreTx { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }

    pub fn register_ngo(&self, ngo: &NgoRecord) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO ngos (id, name, registration_number) VALUES (?1, ?2, ?3)",
            params![ngo.id, ngo.name, ngo.registration_number],
        )?;
        Ok(())
    }

    pub fn ngo_exists(&self, id: &str) -> Result<bool> {
        ngo_exists(&self.connect()?, id)
    }

    /// Fails with a validation error unless `id` names a registered NGO.
    pub fn ensure_ngo(&self, id: &str) -> Result<()> {
        require_ngo(&self.connect()?, id)
    }

    pub fn incident(&self, id: &str) -> Result<Incident> {
        load_incident(&self.connect()?, id)
    }

    pub fn incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().into()));
        }
        if let Some(severity) = filter.severity {
            clauses.push("severity = ?");
            values.push(Value::Text(severity.as_str().into()));
        }
        if let Some(incident_type) = filter.incident_type {
            clauses.push("incident_type = ?");
            values.push(Value::Text(incident_type.as_str().into()));
        }
        if let Some(from) = filter.created_from {
            clauses.push("created_at >= ?");
            values.push(Value::Text(timestamp(from)));
        }
        if let Some(to) = filter.created_to {
            clauses.push("created_at <= ?");
            values.push(Value::Text(timestamp(to)));
        }

        let sql = format!(
            "SELECT doc FROM incidents {} ORDER BY priority DESC, created_at DESC, id ASC",
            where_clause(&clauses)
        );
        query_docs(&self.connect()?, &sql, values)
    }

    /// Incidents inside `bbox` whose status is not in `excluded`.
    pub fn incidents_within(
        &self,
        bbox: BoundingBox,
        excluded: &[IncidentStatus],
    ) -> Result<Vec<Incident>> {
        let mut values = bbox_values(bbox);
        let mut sql = String::from(
            "SELECT doc FROM incidents
             WHERE latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?",
        );
        if !excluded.is_empty() {
            sql.push_str(" AND status NOT IN (");
            sql.push_str(&vec!["?"; excluded.len()].join(", "));
            sql.push(')');
            values.extend(excluded.iter().map(|s| Value::Text(s.as_str().into())));
        }
        query_docs(&self.connect()?, &sql, values)
    }

    pub fn resource(&self, id: &str) -> Result<Resource> {
        load_resource(&self.connect()?, id)
    }

    pub fn resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(resource_type) = filter.resource_type {
            clauses.push("resource_type = ?");
            values.push(Value::Text(resource_type.as_str().into()));
        }
        if let Some(min) = filter.min_available {
            clauses.push("available_quantity >= ?");
            values.push(Value::Integer(i64::from(min)));
        }
        if let Some(provider) = &filter.provided_by {
            clauses.push("provided_by = ?");
            values.push(Value::Text(provider.clone()));
        }
        if let Some(now) = filter.unexpired_at {
            clauses.push("(available_until IS NULL OR available_until >= ?)");
            values.push(Value::Text(timestamp(now)));
        }

        let sql = format!(
            "SELECT doc FROM resources {} ORDER BY last_updated DESC, id ASC",
            where_clause(&clauses)
        );
        query_docs(&self.connect()?, &sql, values)
    }

    pub fn resources_within(
        &self,
        bbox: BoundingBox,
        resource_type: Option<ResourceType>,
    ) -> Result<Vec<Resource>> {
        let mut values = bbox_values(bbox);
        let mut sql = String::from(
            "SELECT doc FROM resources
             WHERE latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?",
        );
        if let Some(resource_type) = resource_type {
            sql.push_str(" AND resource_type = ?");
            values.push(Value::Text(resource_type.as_str().into()));
        }
        query_docs(&self.connect()?, &sql, values)
    }

    pub fn request(&self, id: &str) -> Result<ResourceRequest> {
        load_request(&self.connect()?, id)
    }
}

/// Handle to an open write transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    pub fn ensure_ngo(&self, id: &str) -> Result<()> {
        require_ngo(self.conn, id)
    }

    pub fn incident(&self, id: &str) -> Result<Incident> {
        load_incident(self.conn, id)
    }

    pub fn save_incident(&self, incident: &Incident) -> Result<()> {
        let doc = serde_json::to_string(incident)?;
        self.conn.execute(
            "INSERT INTO incidents
                (id, status, severity, incident_type, priority, longitude, latitude, created_at, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                severity = excluded.severity,
                incident_type = excluded.incident_type,
                priority = excluded.priority,
                longitude = excluded.longitude,
                latitude = excluded.latitude,
                doc = excluded.doc",
            params![
                incident.id,
                incident.status.as_str(),
                incident.severity.as_str(),
                incident.incident_type.as_str(),
                incident.priority.value(),
                incident.location.longitude(),
                incident.location.latitude(),
                timestamp(incident.created_at),
                doc,
            ],
        )?;
        Ok(())
    }

    pub fn resource(&self, id: &str) -> Result<Resource> {
        load_resource(self.conn, id)
    }

    pub fn insert_resource(&self, resource: &Resource) -> Result<()> {
        let doc = serde_json::to_string(resource)?;
        self.conn.execute(
            "INSERT INTO resources
                (id, resource_type, provided_by, quantity, available_quantity, available_until,
                 last_updated, longitude, latitude, version, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                resource.id,
                resource.resource_type.as_str(),
                resource.provided_by,
                resource.quantity,
                resource.available_quantity,
                resource.available_until.map(timestamp),
                timestamp(resource.last_updated),
                resource.location.longitude(),
                resource.location.latitude(),
                resource.version,
                doc,
            ],
        )?;
        Ok(())
    }

    /// Writes `resource` only if the stored version still equals
    /// `resource.version`. On success the version is bumped in place and
    /// `true` is returned; a concurrent writer yields `false` and nothing is
    /// written.
    pub fn update_resource(&self, resource: &mut Resource) -> Result<bool> {
        let expected = resource.version;
        resource.version = expected + 1;
        let doc = serde_json::to_string(&*resource)?;
        let changed = self.conn.execute(
            "UPDATE resources SET
                quantity = ?1,
                available_quantity = ?2,
                available_until = ?3,
                last_updated = ?4,
                version = ?5,
                doc = ?6
             WHERE id = ?7 AND version = ?8",
            params![
                resource.quantity,
                resource.available_quantity,
                resource.available_until.map(timestamp),
                timestamp(resource.last_updated),
                resource.version,
                doc,
                resource.id,
                expected,
            ],
        )?;
        if changed == 0 {
            resource.version = expected;
            return Ok(false);
        }
        Ok(true)
    }

    pub fn request(&self, id: &str) -> Result<ResourceRequest> {
        load_request(self.conn, id)
    }

    pub fn save_request(&self, request: &ResourceRequest) -> Result<()> {
        let doc = serde_json::to_string(request)?;
        self.conn.execute(
            "INSERT INTO resource_requests
                (id, status, resource_type, related_incident, target_resource, created_at, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                target_resource = excluded.target_resource,
                doc = excluded.doc",
            params![
                request.id,
                request.status.as_str(),
                request.resource_type.as_str(),
                request.related_incident,
                request.target_resource,
                timestamp(request.created_at),
                doc,
            ],
        )?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps so that text comparison orders chronologically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn where_clause(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

fn bbox_values(bbox: BoundingBox) -> Vec<Value> {
    vec![
        Value::Real(bbox.min_latitude),
        Value::Real(bbox.max_latitude),
        Value::Real(bbox.min_longitude),
        Value::Real(bbox.max_longitude),
    ]
}

fn ngo_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM ngos WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn require_ngo(conn: &Connection, id: &str) -> Result<()> {
    if ngo_exists(conn, id)? {
        Ok(())
    } else {
        Err(ReliefError::Validation(
            "Invalid NGO ID: No NGO found with this ID".into(),
        ))
    }
}

fn load_incident(conn: &Connection, id: &str) -> Result<Incident> {
    load_doc(conn, "SELECT doc FROM incidents WHERE id = ?1", id)?
        .ok_or_else(|| ReliefError::not_found("incident", id))
}

fn load_resource(conn: &Connection, id: &str) -> Result<Resource> {
    load_doc(conn, "SELECT doc FROM resources WHERE id = ?1", id)?
        .ok_or_else(|| ReliefError::not_found("resource", id))
}

fn load_request(conn: &Connection, id: &str) -> Result<ResourceRequest> {
    load_doc(conn, "SELECT doc FROM resource_requests WHERE id = ?1", id)?
        .ok_or_else(|| ReliefError::not_found("resource request", id))
}

fn load_doc<T: DeserializeOwned>(conn: &Connection, sql: &str, id: &str) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params![id], map_doc).optional()?)
}

fn query_docs<T: DeserializeOwned>(conn: &Connection, sql: &str, values: Vec<Value>) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(values), map_doc)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn map_doc<T: DeserializeOwned>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    let doc: String = row.get(0)?;
    serde_json::from_str(&doc).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn db_path(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        format!("/tmp/relief-core-tests/{name}-{nanos}.db")
    }

    pub(crate) fn open_store(name: &str) -> Store {
        Store::open(&db_path(name)).expect("open store")
    }

    pub(crate) fn seed_ngo(store: &Store, id: &str) {
        store
            .register_ngo(&NgoRecord {
                id: id.into(),
                name: format!("{id} relief"),
                registration_number: format!("REG-{id}"),
            })
            .expect("register ngo");
    }

    #[test]
    fn ngo_directory_lookup() {
        let store = open_store("ngo-lookup");
        seed_ngo(&store, "ngo-1");
        assert!(store.ngo_exists("ngo-1").expect("exists"));
        assert!(!store.ngo_exists("ngo-2").expect("exists"));
    }

    #[test]
    fn duplicate_registration_number_is_duplicate_key() {
        let store = open_store("ngo-dup");
        seed_ngo(&store, "ngo-1");
        let err = store
            .register_ngo(&NgoRecord {
                id: "ngo-2".into(),
                name: "other".into(),
                registration_number: "REG-ngo-1".into(),
            })
            .expect_err("duplicate");
        assert!(matches!(err, ReliefError::DuplicateKey(_)));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let store = open_store("missing");
        assert!(matches!(
            store.incident("nope"),
            Err(ReliefError::NotFound { entity: "incident", .. })
        ));
        assert!(matches!(
            store.resource("nope"),
            Err(ReliefError::NotFound { entity: "resource", .. })
        ));
        assert!(matches!(
            store.request("nope"),
            Err(ReliefError::NotFound { entity: "resource request", .. })
        ));
    }

    #[test]
    fn failed_write_rolls_back() {
        let store = open_store("rollback");
        seed_ngo(&store, "ngo-1");
        let result: Result<()> = store.write(|tx| {
            tx.conn.execute(
                "INSERT INTO ngos (id, name, registration_number) VALUES ('ngo-x', 'x', 'REG-x')",
                [],
            )?;
            Err(ReliefError::Validation("abort".into()))
        });
        assert!(result.is_err());
        assert!(!store.ngo_exists("ngo-x").expect("exists"));
    }

    #[test]
    fn timestamps_sort_chronologically_as_text() {
        let early = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .expect("parse")
            .with_timezone(&Utc);
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(timestamp(early) < timestamp(late));
    }
}
