// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod coordinator;
pub mod fetcher;
pub mod kms;
pub mod normalizer;
pub mod registry;
pub mod store;
pub mod token_exchange;

pub use coordinator::{
    ClientPopupLauncher, Coordinator, CoordinatorSettings, FlowStatus, MessageOutcome,
    PopupFeatures, PopupLauncher, PopupRequest, PopupWindow, StartedFlow, WindowGeometry,
    WindowMessage,
};
pub use fetcher::{resolve_id, ProfileFetcher, Snapshot};
pub use kms::KmsService;
pub use normalizer::normalize;
pub use registry::{AuthStyle, ProviderDescriptor, ProviderRegistry};
pub use store::{ConnectionStore, PersistReport};
pub use token_exchange::TokenExchangeClient;
