// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Connections (one document per user/provider pair)
//! - Provider records (one document per fetched resource kind)
//! - Data points (flattened key/value pairs of a record)

use crate::db::{collections, data_point_doc_id};
use crate::error::AppError;
use crate::models::{Connection, DataPoint, ProviderDataRecord};
use firestore::errors::FirestoreError;

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: firestore::FirestoreDb,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self { client })
    }

    // ─── Connection Operations ───────────────────────────────────

    /// Create a connection document. Fails if the document already exists.
    pub async fn insert_connection(&self, connection: &Connection) -> Result<(), AppError> {
        let result: Result<Connection, FirestoreError> = self
            .client
            .fluent()
            .insert()
            .into(collections::CONNECTIONS)
            .document_id(&connection.id)
            .object(connection)
            .execute()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(FirestoreError::DataConflictError(_)) => {
                Err(AppError::AlreadyConnected(connection.provider))
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    pub async fn get_connection(&self, id: &str) -> Result<Option<Connection>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::CONNECTIONS)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>, AppError> {
        let user_id = user_id.to_string();
        let mut connections: Vec<Connection> = self
            .client
            .fluent()
            .select()
            .from(collections::CONNECTIONS)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // Sorted here rather than in the query to avoid a composite index
        connections.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(connections)
    }

    pub async fn delete_connection(&self, id: &str) -> Result<(), AppError> {
        self.client
            .fluent()
            .delete()
            .from(collections::CONNECTIONS)
            .document_id(id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Provider Record Operations ──────────────────────────────

    pub async fn insert_record(&self, record: &ProviderDataRecord) -> Result<(), AppError> {
        let _: ProviderDataRecord = self
            .client
            .fluent()
            .insert()
            .into(collections::PROVIDER_RECORDS)
            .document_id(&record.id)
            .object(record)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn list_records(
        &self,
        connection_id: &str,
    ) -> Result<Vec<ProviderDataRecord>, AppError> {
        let connection_id = connection_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::PROVIDER_RECORDS)
            .filter(move |q| q.field("connection_id").eq(connection_id.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn delete_record(&self, id: &str) -> Result<(), AppError> {
        self.client
            .fluent()
            .delete()
            .from(collections::PROVIDER_RECORDS)
            .document_id(id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Data Point Operations ───────────────────────────────────

    pub async fn insert_data_point(&self, point: &DataPoint) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::DATA_POINTS)
            .document_id(data_point_doc_id(point))
            .object(point)
            .execute()
            .await
            .map_err(|e| AppError::DataPointWrite {
                key: point.data_key.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub async fn list_data_points(&self, record_id: &str) -> Result<Vec<DataPoint>, AppError> {
        let record_id = record_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::DATA_POINTS)
            .filter(move |q| q.field("provider_record_id").eq(record_id.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete all data points of a record using batched transactions.
    pub async fn delete_data_points(&self, record_id: &str) -> Result<usize, AppError> {
        let points = self.list_data_points(record_id).await?;
        let client = &self.client;

        for chunk in points.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for point in chunk {
                client
                    .fluent()
                    .delete()
                    .from(collections::DATA_POINTS)
                    .document_id(data_point_doc_id(point))
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collections::DATA_POINTS,
                            e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        tracing::debug!(record_id, count = points.len(), "Deleted data points");
        Ok(points.len())
    }
}
