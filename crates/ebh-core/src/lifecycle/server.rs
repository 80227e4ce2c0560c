//! Boundary to the external server implementations.
//!
//! The harness treats the coordination service and the broker as black boxes:
//! it hands them a property map, gets back a running process, and later asks
//! that process to shut down.

use std::future::Future;

use crate::error::ServerError;
use crate::properties::PropertyMap;

/// Launches one kind of external server from a property map.
///
/// Uses RPITIT with explicit `Send` bounds so the controller can drive the
/// launch from a background task.
pub trait EmbeddedServer: Send + Sync + 'static {
    type Process: ServerProcess;

    /// Boot the server. Resolves once the server accepts connections.
    fn launch(
        &self,
        properties: &PropertyMap,
    ) -> impl Future<Output = Result<Self::Process, ServerError>> + Send;
}

/// A running server returned by [`EmbeddedServer::launch`].
pub trait ServerProcess: Send + 'static {
    /// Request a graceful shutdown and resolve once every helper task the
    /// server owns has joined.
    ///
    /// Implementations keep going when a component fails to stop and record
    /// the failure in the returned outcome instead.
    fn shutdown(&mut self) -> impl Future<Output = ShutdownOutcome> + Send;
}

/// Per-component result of a best-effort shutdown.
#[derive(Debug, Default)]
pub struct ShutdownOutcome {
    failures: Vec<(String, ServerError)>,
}

impl ShutdownOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of stopping `component`. `Ok` results are dropped.
    pub fn record(&mut self, component: &str, result: Result<(), ServerError>) {
        if let Err(error) = result {
            self.failures.push((component.to_string(), error));
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[(String, ServerError)] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<(String, ServerError)> {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_errors_are_recorded() {
        let mut outcome = ShutdownOutcome::new();
        outcome.record("acceptor", Ok(()));
        assert!(outcome.is_clean());

        outcome.record("database", Err(ServerError::shutdown("flush failed")));
        assert!(!outcome.is_clean());
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.failures()[0].0, "database");
    }
}
