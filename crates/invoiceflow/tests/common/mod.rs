//! Shared test utilities for invoiceflow integration tests.
//!
//! This module provides:
//! - `TestHarness` running the full service against in-memory SQLite
//! - Scripted OCR engine and recording webhook notifier
//! - Builders for engine replies and uploads

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
