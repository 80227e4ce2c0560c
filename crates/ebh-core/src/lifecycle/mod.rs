//! Service lifecycle: states, the external-server boundary, and the
//! controller that drives one server through its states.

mod controller;
mod profile;
mod server;
mod state;

pub use controller::{ServiceController, ServiceResources};
pub use profile::{DependencyLink, Endpoint, ServiceProfile, keys};
pub use server::{EmbeddedServer, ServerProcess, ShutdownOutcome};
pub use state::LifecycleState;
