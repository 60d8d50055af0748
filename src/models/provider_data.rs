// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Generic key/value model for fetched provider data.

use super::Provider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// One fetched resource kind for a connection (`provider_records` collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDataRecord {
    /// Document ID (UUID)
    pub id: String,
    pub connection_id: String,
    /// `Connection::generation` at the time of writing
    #[serde(default)]
    pub generation: String,
    pub provider: Provider,
    /// Resource kind, e.g. "profile", "calendar", "top_tracks"
    pub data_type: String,
    /// When the data was fetched (ISO 8601)
    pub last_updated: String,
}

/// How a stored `data_value` string should be read back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Scalar,
    /// JSON-encoded object or array
    Composite,
}

/// One flattened key/value pair (`data_points` collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub provider_record_id: String,
    pub data_key: String,
    pub data_value: String,
    #[serde(default)]
    pub value_kind: ValueKind,
}

/// A normalized value before persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Scalar(String),
    /// Opaque structured value, stored JSON-encoded
    Composite(serde_json::Value),
}

impl DataValue {
    /// Convert a JSON value, dropping nulls.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => None,
            Value::String(s) => Some(DataValue::Scalar(s.clone())),
            Value::Number(n) => Some(DataValue::Scalar(n.to_string())),
            Value::Bool(b) => Some(DataValue::Scalar(b.to_string())),
            Value::Array(_) | Value::Object(_) => Some(DataValue::Composite(value.clone())),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            DataValue::Scalar(_) => ValueKind::Scalar,
            DataValue::Composite(_) => ValueKind::Composite,
        }
    }

    /// String form written to the `data_value` column.
    pub fn to_stored_string(&self) -> String {
        match self {
            DataValue::Scalar(s) => s.clone(),
            DataValue::Composite(v) => v.to_string(),
        }
    }
}

/// A key/value pair emitted by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPoint {
    pub key: String,
    pub value: DataValue,
}

/// All points for one resource kind, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub data_type: String,
    pub points: Vec<NormalizedPoint>,
}

impl NormalizedRecord {
    /// Look up a point value by key.
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.points.iter().find(|p| p.key == key).map(|p| &p.value)
    }
}

/// A stored resource reassembled for display.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StoredResource {
    pub record_id: String,
    pub last_updated: String,
    pub points: BTreeMap<String, String>,
}
