// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory storage backend.
//!
//! Mirrors the Firestore collections with concurrent maps. Used for local
//! development (`STORAGE=memory`) and tests, where individual data point
//! writes can be made to fail.

use crate::db::data_point_doc_id;
use crate::error::AppError;
use crate::models::{Connection, DataPoint, ProviderDataRecord};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    connections: DashMap<String, Connection>,
    records: DashMap<String, ProviderDataRecord>,
    points: DashMap<String, DataPoint>,
    failing_point_keys: DashSet<String>,
}

/// In-memory database. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<Tables>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write of a data point with this key fail.
    pub fn fail_data_point_writes(&self, data_key: &str) {
        self.tables.failing_point_keys.insert(data_key.to_string());
    }

    pub fn connection_count(&self) -> usize {
        self.tables.connections.len()
    }

    pub fn record_count(&self) -> usize {
        self.tables.records.len()
    }

    pub fn data_point_count(&self) -> usize {
        self.tables.points.len()
    }

    // ─── Connection Operations ───────────────────────────────────

    pub fn insert_connection(&self, connection: &Connection) -> Result<(), AppError> {
        match self.tables.connections.entry(connection.id.clone()) {
            Entry::Occupied(_) => Err(AppError::AlreadyConnected(connection.provider)),
            Entry::Vacant(slot) => {
                slot.insert(connection.clone());
                Ok(())
            }
        }
    }

    pub fn get_connection(&self, id: &str) -> Result<Option<Connection>, AppError> {
        Ok(self.tables.connections.get(id).map(|c| c.clone()))
    }

    pub fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>, AppError> {
        let mut connections: Vec<Connection> = self
            .tables
            .connections
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.clone())
            .collect();
        connections.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(connections)
    }

    pub fn delete_connection(&self, id: &str) -> Result<(), AppError> {
        self.tables.connections.remove(id);
        Ok(())
    }

    // ─── Provider Record Operations ──────────────────────────────

    pub fn insert_record(&self, record: &ProviderDataRecord) -> Result<(), AppError> {
        match self.tables.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(AppError::Database(format!(
                "Record {} already exists",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    pub fn list_records(&self, connection_id: &str) -> Result<Vec<ProviderDataRecord>, AppError> {
        Ok(self
            .tables
            .records
            .iter()
            .filter(|r| r.connection_id == connection_id)
            .map(|r| r.clone())
            .collect())
    }

    pub fn delete_record(&self, id: &str) -> Result<(), AppError> {
        self.tables.records.remove(id);
        Ok(())
    }

    // ─── Data Point Operations ───────────────────────────────────

    pub fn insert_data_point(&self, point: &DataPoint) -> Result<(), AppError> {
        if self.tables.failing_point_keys.contains(&point.data_key) {
            return Err(AppError::DataPointWrite {
                key: point.data_key.clone(),
                message: "injected write failure".to_string(),
            });
        }
        self.tables
            .points
            .insert(data_point_doc_id(point), point.clone());
        Ok(())
    }

    pub fn list_data_points(&self, record_id: &str) -> Result<Vec<DataPoint>, AppError> {
        Ok(self
            .tables
            .points
            .iter()
            .filter(|p| p.provider_record_id == record_id)
            .map(|p| p.clone())
            .collect())
    }

    pub fn delete_data_points(&self, record_id: &str) -> Result<usize, AppError> {
        let mut removed = 0;
        self.tables.points.retain(|_, p| {
            if p.provider_record_id == record_id {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}
