//! Shared test utilities for payslip-sync integration tests.
//!
//! - `TestHarness` for an isolated watched tree backed by a SQLite store
//! - `WorkbookBuilder` for generating `.xlsx` fixtures

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
