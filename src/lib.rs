//! Force-directed layout for contact graphs.
//!
//! [`graph::GraphModel`] holds the validated nodes and links,
//! [`layout::run`] turns a snapshot into coordinates, and
//! [`scheduler::SimulationScheduler`] runs layouts on a background thread and
//! publishes the results.

pub mod contacts;
pub mod graph;
pub mod layout;
pub mod query;
pub mod scheduler;
pub mod snapshot;

pub use graph::{GraphModel, GraphSnapshot, NodeId, ValidationError};
pub use layout::{ForceConstants, LayoutSettings, Positions};
pub use scheduler::{LayoutResult, SimulationScheduler, TriggerReason};
