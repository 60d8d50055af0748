// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Connection store: connections, provider records and data points.
//!
//! Snapshot persistence is best-effort. A failed data point write is logged
//! and skipped, so a snapshot may end up partially stored.

use crate::config::DisconnectPolicy;
use crate::db::{connection_doc_id, Database};
use crate::error::AppError;
use crate::models::{
    Connection, ConnectionStatus, DataPoint, NormalizedRecord, Provider, ProviderDataRecord,
    StoredResource, TokenSet,
};
use crate::services::KmsService;
use crate::time_utils::format_utc_rfc3339;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;

/// Concurrent data point writes per record.
const POINT_WRITE_CONCURRENCY: usize = 8;

/// Outcome counts of a snapshot write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub records_written: usize,
    pub records_failed: usize,
    pub points_written: usize,
    pub points_failed: usize,
}

#[derive(Clone)]
pub struct ConnectionStore {
    db: Database,
    kms: KmsService,
    policy: DisconnectPolicy,
}

impl ConnectionStore {
    pub fn new(db: Database, kms: KmsService, policy: DisconnectPolicy) -> Self {
        Self { db, kms, policy }
    }

    /// Create the connection for (user, provider).
    ///
    /// Fails with `AlreadyConnected` when one exists; the storage backend
    /// enforces this through the deterministic document id.
    pub async fn save_connection(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: &str,
        tokens: &TokenSet,
    ) -> Result<Connection, AppError> {
        let id = connection_doc_id(user_id, provider);
        let aad = id.as_bytes();

        let access_token_encrypted = self.kms.encrypt(&tokens.access_token, Some(aad)).await?;
        let refresh_token_encrypted = match &tokens.refresh_token {
            Some(rt) => Some(self.kms.encrypt(rt, Some(aad)).await?),
            None => None,
        };

        let now = Utc::now();
        let expires_at = tokens
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| format_utc_rfc3339(now + chrono::Duration::seconds(secs)));

        let connection = Connection {
            id,
            user_id: user_id.to_string(),
            provider,
            provider_user_id: provider_user_id.to_string(),
            generation: uuid::Uuid::new_v4().to_string(),
            access_token_encrypted,
            refresh_token_encrypted,
            expires_at,
            status: ConnectionStatus::Active,
            created_at: format_utc_rfc3339(now),
        };

        self.db.insert_connection(&connection).await?;

        tracing::info!(
            connection_id = %connection.id,
            provider = %provider,
            "Connection saved"
        );

        Ok(connection)
    }

    /// Write every record and its points. Never fails as a whole.
    ///
    /// Records are tagged with the connection's generation, so data left
    /// behind by an earlier connect is never read back for this one.
    pub async fn persist_snapshot(
        &self,
        connection: &Connection,
        records: &[NormalizedRecord],
    ) -> PersistReport {
        let connection_id = connection.id.as_str();
        let mut report = PersistReport::default();
        let last_updated = format_utc_rfc3339(Utc::now());

        for normalized in records {
            let record = ProviderDataRecord {
                id: uuid::Uuid::new_v4().to_string(),
                connection_id: connection.id.clone(),
                generation: connection.generation.clone(),
                provider: connection.provider,
                data_type: normalized.data_type.clone(),
                last_updated: last_updated.clone(),
            };

            if let Err(e) = self.db.insert_record(&record).await {
                tracing::error!(
                    connection_id,
                    data_type = %record.data_type,
                    error = %e,
                    "Failed to store provider record, skipping its points"
                );
                report.records_failed += 1;
                report.points_failed += normalized.points.len();
                continue;
            }
            report.records_written += 1;

            let points: Vec<DataPoint> = normalized
                .points
                .iter()
                .map(|point| DataPoint {
                    provider_record_id: record.id.clone(),
                    data_key: point.key.clone(),
                    data_value: point.value.to_stored_string(),
                    value_kind: point.value.kind(),
                })
                .collect();

            let results: Vec<Result<(), AppError>> = stream::iter(points)
                .map(|point| {
                    let db = self.db.clone();
                    async move { db.insert_data_point(&point).await }
                })
                .buffer_unordered(POINT_WRITE_CONCURRENCY)
                .collect()
                .await;

            for result in results {
                match result {
                    Ok(()) => report.points_written += 1,
                    Err(e) => {
                        tracing::warn!(
                            connection_id,
                            data_type = %record.data_type,
                            error = %e,
                            "Data point write failed, skipping"
                        );
                        report.points_failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            connection_id,
            records_written = report.records_written,
            records_failed = report.records_failed,
            points_written = report.points_written,
            points_failed = report.points_failed,
            "Snapshot persisted"
        );

        report
    }

    /// Stored resources keyed by data type, for display.
    ///
    /// An unknown or disconnected connection yields an empty map. Records
    /// from an earlier connect of the same (user, provider) are skipped.
    /// When a data type has several records the most recent one wins.
    pub async fn load_snapshot(
        &self,
        connection_id: &str,
    ) -> Result<BTreeMap<String, StoredResource>, AppError> {
        let Some(connection) = self.db.get_connection(connection_id).await? else {
            return Ok(BTreeMap::new());
        };

        let mut latest: BTreeMap<String, ProviderDataRecord> = BTreeMap::new();
        for record in self.db.list_records(connection_id).await? {
            if record.generation != connection.generation {
                continue;
            }
            match latest.get(&record.data_type) {
                Some(existing) if existing.last_updated >= record.last_updated => {}
                _ => {
                    latest.insert(record.data_type.clone(), record);
                }
            }
        }

        let mut snapshot = BTreeMap::new();
        for (data_type, record) in latest {
            let points = self
                .db
                .list_data_points(&record.id)
                .await?
                .into_iter()
                .map(|p| (p.data_key, p.data_value))
                .collect();

            snapshot.insert(
                data_type,
                StoredResource {
                    record_id: record.id,
                    last_updated: record.last_updated,
                    points,
                },
            );
        }

        Ok(snapshot)
    }

    /// Remove a connection, and under the cascade policy its data too.
    ///
    /// Child rows go first: if the cascade fails part way, the connection
    /// is still there and the disconnect can be retried.
    pub async fn disconnect(&self, connection_id: &str) -> Result<(), AppError> {
        let (mut records_deleted, mut points_deleted) = (0, 0);
        if self.policy == DisconnectPolicy::Cascade {
            for record in self.db.list_records(connection_id).await? {
                points_deleted += self.db.delete_data_points(&record.id).await?;
                self.db.delete_record(&record.id).await?;
                records_deleted += 1;
            }
        }

        self.db.delete_connection(connection_id).await?;

        tracing::info!(
            connection_id,
            policy = ?self.policy,
            records_deleted,
            points_deleted,
            "Connection disconnected"
        );
        Ok(())
    }

    pub async fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>, AppError> {
        self.db.list_connections(user_id).await
    }

    pub async fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>, AppError> {
        self.db.get_connection(connection_id).await
    }

    /// Decrypted tokens of a connection.
    pub async fn tokens(&self, connection_id: &str) -> Result<TokenSet, AppError> {
        let connection = self
            .db
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Connection {}", connection_id)))?;
        let aad = connection.id.as_bytes();

        let access_token = self
            .kms
            .decrypt(&connection.access_token_encrypted, Some(aad))
            .await?;
        let refresh_token = match &connection.refresh_token_encrypted {
            Some(rt) => Some(self.kms.decrypt(rt, Some(aad)).await?),
            None => None,
        };

        let expires_in = connection.expires_at.as_deref().and_then(|at| {
            let at = chrono::DateTime::parse_from_rfc3339(at).ok()?;
            u64::try_from((at.with_timezone(&Utc) - Utc::now()).num_seconds()).ok()
        });

        Ok(TokenSet {
            access_token,
            refresh_token,
            expires_in,
        })
    }
}
