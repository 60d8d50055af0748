// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod connection;
pub mod provider;
pub mod provider_data;

pub use connection::{Connection, ConnectionStatus, ConnectionSummary, TokenSet};
pub use provider::Provider;
pub use provider_data::{
    DataPoint, DataValue, NormalizedPoint, NormalizedRecord, ProviderDataRecord, StoredResource,
    ValueKind,
};
