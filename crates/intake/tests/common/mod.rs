//! Shared test utilities for intake integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a pipeline to an in-memory database and fake mailbox
//! - Fakes for the mailbox, the enrichment service and the content repository
//! - Builders for raw messages and test configurations

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::TestHarness;
