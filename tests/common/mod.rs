//! Common test utilities for offline-servicing integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod installer;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use installer::*;
