//! Pure planning core for a virtual-machine cluster manager: resource
//! model and invariants, cluster-imbalance scoring, constructive
//! allocation, hill-descent balancing, capacity analysis, and rolling-
//! reboot scheduling.
//!
//! Every planner here is synchronous and side-effect free: given a
//! [`model::ClusterSnapshot`], it returns a plan (or a [`model::FailMode`]
//! histogram explaining why none exists) without executing it. Callers own
//! execution and hold the only mutable reference to persistent state.

pub mod allocator;
pub mod balancer;
pub mod coloring;
pub mod error;
pub mod hspace;
pub mod iallocator;
pub mod model;
pub mod scoring;
pub mod snapshot;
pub mod units;

pub use error::{Error, Result};
