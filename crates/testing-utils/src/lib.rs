//! # LastMile Testing Utils
//!
//! Shared testing utilities for the last-mile dispatch workspace.
//!
//! - **InMemoryBackend**: authoritative backend fake with a live change stream,
//!   a single-session directory and an offline switch
//! - **MockDeviceStore**: device-local key-value store and mutation log
//! - **RecordingAlertSink**: captures assignment alerts instead of vibrating
//! - **Builders**: `DeliveryBuilder`, `CourierBuilder`
//!
//! ```toml
//! [dev-dependencies]
//! lastmile-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
