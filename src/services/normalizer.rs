// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Flattens a provider snapshot into key/value records.
//!
//! Pure and synchronous. The profile record always comes first, followed by
//! the optional resources in registry order.

use crate::models::{DataValue, NormalizedPoint, NormalizedRecord};
use crate::services::fetcher::Snapshot;
use crate::services::registry::{Extract, FieldMap, ProviderDescriptor, ResourceShape};
use serde_json::{Map, Value};

/// Most list items emitted per resource.
pub const MAX_LIST_ITEMS: usize = 10;

pub const PROFILE_DATA_TYPE: &str = "profile";

/// Normalize a snapshot into records ready for persistence.
pub fn normalize(snapshot: &Snapshot, descriptor: &ProviderDescriptor) -> Vec<NormalizedRecord> {
    let mut records = vec![NormalizedRecord {
        data_type: PROFILE_DATA_TYPE.to_string(),
        points: map_fields(&snapshot.profile, descriptor.profile_fields),
    }];

    for resource in &descriptor.optional_resources {
        let Some(value) = snapshot.resource(resource.name) else {
            continue;
        };

        let points = match resource.shape {
            ResourceShape::Object { root, fields } => match value.pointer(root) {
                Some(object) => map_fields(object, fields),
                None => Vec::new(),
            },
            ResourceShape::List {
                items,
                item_type,
                summary,
                projection,
            } => list_points(value, items, item_type, summary, projection),
        };

        if points.is_empty() {
            tracing::debug!(
                provider = %snapshot.provider,
                data_type = resource.name,
                "Resource produced no data points"
            );
            continue;
        }

        records.push(NormalizedRecord {
            data_type: resource.name.to_string(),
            points,
        });
    }

    records
}

/// Summary points followed by up to [`MAX_LIST_ITEMS`] projected items.
///
/// An absent or empty list yields nothing, summary included.
fn list_points(
    value: &Value,
    items: &str,
    item_type: &str,
    summary: &[FieldMap],
    projection: &[FieldMap],
) -> Vec<NormalizedPoint> {
    let list = match value.pointer(items).and_then(Value::as_array) {
        Some(list) if !list.is_empty() => list,
        _ => return Vec::new(),
    };

    let mut points = map_fields(value, summary);
    points.extend(
        list.iter()
            .take(MAX_LIST_ITEMS)
            .enumerate()
            .map(|(i, item)| NormalizedPoint {
                key: format!("{}_{}", item_type, i + 1),
                value: DataValue::Composite(Value::Object(project(item, projection))),
            }),
    );
    points
}

/// Curated subset of an item; absent fields are left out.
fn project(item: &Value, projection: &[FieldMap]) -> Map<String, Value> {
    projection
        .iter()
        .filter_map(|f| extract(item, &f.extract).map(|v| (f.key.to_string(), v)))
        .collect()
}

fn map_fields(value: &Value, fields: &[FieldMap]) -> Vec<NormalizedPoint> {
    fields
        .iter()
        .filter_map(|f| {
            let data = extract(value, &f.extract)?;
            Some(NormalizedPoint {
                key: f.key.to_string(),
                value: DataValue::from_json(&data)?,
            })
        })
        .collect()
}

fn extract(value: &Value, rule: &Extract) -> Option<Value> {
    match rule {
        Extract::Field(ptr) => value.pointer(ptr).filter(|v| !v.is_null()).cloned(),
        Extract::Truncated(ptr, n) => {
            let s = value.pointer(ptr)?.as_str()?;
            Some(Value::String(s.chars().take(*n).collect()))
        }
        Extract::Joined { array, field } => {
            let names: Vec<&str> = value
                .pointer(array)?
                .as_array()?
                .iter()
                .filter_map(|v| v.get(field).and_then(Value::as_str))
                .collect();
            (!names.is_empty()).then(|| Value::String(names.join(", ")))
        }
        Extract::Length(ptr) => Some(Value::from(value.pointer(ptr)?.as_array()?.len())),
        Extract::FirstOf(alternatives) => alternatives.iter().find_map(|alt| {
            extract(value, alt).filter(|v| v.as_str().map_or(true, |s| !s.is_empty()))
        }),
    }
}
