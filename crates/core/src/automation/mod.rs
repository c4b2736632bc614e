//! Automation capability boundary.
//!
//! This module provides the `AutomationClient` trait (Adapter Pattern) and
//! the concrete adapters that implement it.

pub mod adapters;
pub mod client;

pub use adapters::{BridgeClient, MockClient};
pub use client::{AutomationClient, AutomationError, ReportFormat};
