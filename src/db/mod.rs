//! Database layer (Firestore, with an in-memory backend for tests and local runs).

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{Connection, DataPoint, Provider, ProviderDataRecord};

/// Collection names as constants.
pub mod collections {
    pub const CONNECTIONS: &str = "connections";
    pub const PROVIDER_RECORDS: &str = "provider_records";
    pub const DATA_POINTS: &str = "data_points";
}

/// Document ID for a connection.
///
/// Deterministic in (user, provider) so that a create-only insert enforces
/// at most one connection per pair.
pub fn connection_doc_id(user_id: &str, provider: Provider) -> String {
    format!("{}_{}", urlencoding::encode(user_id), provider)
}

/// Document ID for a data point, unique per (record, key).
pub fn data_point_doc_id(point: &DataPoint) -> String {
    format!(
        "{}_{}",
        point.provider_record_id,
        urlencoding::encode(&point.data_key)
    )
}

/// Storage backend handle.
#[derive(Clone)]
pub enum Database {
    Firestore(FirestoreDb),
    Memory(MemoryDb),
}

impl Database {
    /// Insert a new connection; fails with `AlreadyConnected` if one exists.
    pub async fn insert_connection(&self, connection: &Connection) -> Result<(), AppError> {
        match self {
            Database::Firestore(db) => db.insert_connection(connection).await,
            Database::Memory(db) => db.insert_connection(connection),
        }
    }

    pub async fn get_connection(&self, id: &str) -> Result<Option<Connection>, AppError> {
        match self {
            Database::Firestore(db) => db.get_connection(id).await,
            Database::Memory(db) => db.get_connection(id),
        }
    }

    pub async fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>, AppError> {
        match self {
            Database::Firestore(db) => db.list_connections(user_id).await,
            Database::Memory(db) => db.list_connections(user_id),
        }
    }

    pub async fn delete_connection(&self, id: &str) -> Result<(), AppError> {
        match self {
            Database::Firestore(db) => db.delete_connection(id).await,
            Database::Memory(db) => db.delete_connection(id),
        }
    }

    pub async fn insert_record(&self, record: &ProviderDataRecord) -> Result<(), AppError> {
        match self {
            Database::Firestore(db) => db.insert_record(record).await,
            Database::Memory(db) => db.insert_record(record),
        }
    }

    pub async fn list_records(
        &self,
        connection_id: &str,
    ) -> Result<Vec<ProviderDataRecord>, AppError> {
        match self {
            Database::Firestore(db) => db.list_records(connection_id).await,
            Database::Memory(db) => db.list_records(connection_id),
        }
    }

    pub async fn delete_record(&self, id: &str) -> Result<(), AppError> {
        match self {
            Database::Firestore(db) => db.delete_record(id).await,
            Database::Memory(db) => db.delete_record(id),
        }
    }

    pub async fn insert_data_point(&self, point: &DataPoint) -> Result<(), AppError> {
        match self {
            Database::Firestore(db) => db.insert_data_point(point).await,
            Database::Memory(db) => db.insert_data_point(point),
        }
    }

    pub async fn list_data_points(&self, record_id: &str) -> Result<Vec<DataPoint>, AppError> {
        match self {
            Database::Firestore(db) => db.list_data_points(record_id).await,
            Database::Memory(db) => db.list_data_points(record_id),
        }
    }

    /// Delete every data point of a record. Returns how many were removed.
    pub async fn delete_data_points(&self, record_id: &str) -> Result<usize, AppError> {
        match self {
            Database::Firestore(db) => db.delete_data_points(record_id).await,
            Database::Memory(db) => db.delete_data_points(record_id),
        }
    }
}

impl From<FirestoreDb> for Database {
    fn from(db: FirestoreDb) -> Self {
        Database::Firestore(db)
    }
}

impl From<MemoryDb> for Database {
    fn from(db: MemoryDb) -> Self {
        Database::Memory(db)
    }
}
