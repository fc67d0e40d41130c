//! Library half of the confd daemon: config cache & reloader, the
//! signed UDP wire protocol, and the request responder. `main.rs` is
//! a thin binary that wires these into a running UDP server; everything
//! testable lives here so it can be exercised without a socket.

pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod reload;
pub mod responder;
pub mod ssconf;
