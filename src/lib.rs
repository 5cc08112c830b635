//! # offline-servicing
//!
//! Update servicing pipeline for offline operating-system images.
//!
//! ## Design Philosophy
//!
//! offline-servicing is designed to be:
//! - **Conservative with the image** - servicing stack before cumulative
//!   updates, every package validated before it reaches the installer
//! - **Resilient per file** - a failed download or apply is recorded and the
//!   batch moves on; only an unreachable catalog or an unusable mount aborts
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Pipeline
//!
//! 1. [`catalog`] resolves the updates applicable to a product/build
//! 2. [`cache`] prunes cached files the catalog no longer lists
//! 3. [`fetch`] downloads and validates missing content
//! 4. [`apply`] adds the packages to the mounted image in order
//!
//! ## Quick Start
//!
//! ```no_run
//! use offline_servicing::{Config, ImageServicer, cancel_on_shutdown_signal};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(Path::new("servicing.json")).await?;
//!     let servicer = ImageServicer::new(config).await?;
//!
//!     let mut events = servicer.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));
//!
//!     let summary = servicer.run_batch(Path::new(r"C:\mount"), &cancel).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Ordered package application
pub mod apply;
/// Cache layout and supersedence audit
pub mod cache;
/// Catalog backends and update resolution
pub mod catalog;
/// Configuration types
pub mod config;
/// Servicing history persistence
pub mod db;
/// Error types
pub mod error;
/// Content download and validation
pub mod fetch;
/// Retry logic with exponential backoff
pub mod retry;
/// Batch orchestration
pub mod servicer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use apply::{ApplyEngine, ApplyStrategy, PackageInstaller};
pub use cache::{CacheLayout, SupersedenceAuditor};
pub use catalog::{CatalogBackend, CatalogResolver};
pub use config::{Config, ServicingContext, ServicingTarget};
pub use db::Database;
pub use error::{ApplyError, CatalogError, DatabaseError, Error, FetchError, Result};
pub use fetch::{ContainerInspector, ContentFetcher};
pub use servicer::{Components, ImageServicer, PreparedBatch};
pub use types::{
    ApplyOutcome, ApplyStatus, BatchSummary, Classification, ContainerFormat, Event,
    LocalArtifact, Stage, UpdateDescriptor, UpdateId, ValidationState,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when a termination signal arrives.
///
/// A running batch stops between content items or between artifacts, never
/// in the middle of one.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use offline_servicing::cancel_on_shutdown_signal;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cancel = CancellationToken::new();
/// tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));
/// # }
/// ```
pub async fn cancel_on_shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::info!("Cancelling servicing batch");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_listener_returns_once_token_is_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let listener = tokio::spawn(cancel_on_shutdown_signal(token.clone()));
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
