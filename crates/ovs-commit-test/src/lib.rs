//! Test infrastructure for the OVS commit layer
//!
//! Provides:
//! - [`FakeSwitch`]: an in-memory switch implementing `OvsChannel`, with a
//!   call log, failure injection and pushable monitor updates
//! - [`RecordingRegistry`]: an `EntityRegistry` that records every event
//! - Fixtures for interface monitor rows and flow rule sets

pub mod fake_switch;
pub mod fixtures;
mod registry;

pub use fake_switch::{FakeSwitch, RecordedCall};
pub use fixtures::*;
pub use registry::{RecordingRegistry, RegistryEvent};
