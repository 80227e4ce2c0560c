//! Ordered startup and teardown of the coordination service and the broker.
//!
//! Start: coordination → wait for RUNNING → broker (pointed at the
//! coordination address) → wait for RUNNING.
//! Stop: broker → coordination, always both, whatever fails on the way.

use std::time::Duration;

use tracing::{error, info};

use crate::error::{HarnessError, ShutdownFault};
use crate::lifecycle::{
    EmbeddedServer, Endpoint, ServiceController, ServiceProfile, ServiceResources,
};
use crate::properties::PropertyMap;

/// Knobs for [`EmbeddedStack::start`].
#[derive(Debug, Clone, Default)]
pub struct StackSettings {
    pub coordination: ServiceResources,
    pub broker: ServiceResources,
    /// Extra broker properties; managed keys still win.
    pub broker_properties: PropertyMap,
    /// Upper bound for each "await RUNNING". `None` waits indefinitely.
    pub startup_timeout: Option<Duration>,
}

/// What happened during teardown.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Names of the services in the order they were stopped.
    pub stopped: Vec<String>,
    /// Secondary failures that were logged and swallowed.
    pub faults: Vec<ShutdownFault>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// One coordination service plus one broker that depends on it.
pub struct EmbeddedStack<C: EmbeddedServer, B: EmbeddedServer> {
    coordination: ServiceController<C>,
    broker: ServiceController<B>,
}

impl<C: EmbeddedServer, B: EmbeddedServer> EmbeddedStack<C, B> {
    /// Boot both services in dependency order.
    ///
    /// On failure everything already started is torn down before the
    /// triggering error is returned.
    pub async fn start(
        coordination_server: C,
        broker_server: B,
        settings: StackSettings,
    ) -> Result<Self, HarnessError> {
        let coordination = ServiceController::new(
            coordination_server,
            ServiceProfile::coordination(),
            settings.coordination,
        );
        let broker = ServiceController::new(
            broker_server,
            ServiceProfile::broker(coordination.dependency_link(), settings.broker_properties),
            settings.broker,
        );
        let stack = Self {
            coordination,
            broker,
        };

        if let Err(e) = stack.boot(settings.startup_timeout).await {
            error!("Embedded stack failed to start: {e}");
            stack.close().await;
            return Err(e);
        }
        Ok(stack)
    }

    async fn boot(&self, limit: Option<Duration>) -> Result<(), HarnessError> {
        self.coordination.start()?;
        let zk = await_running(&self.coordination, limit).await?;
        info!("Coordination service ready at {zk}");

        self.broker.start()?;
        let kafka = await_running(&self.broker, limit).await?;
        info!("Broker ready at {kafka} (coordination {zk})");
        Ok(())
    }

    pub fn coordination(&self) -> &ServiceController<C> {
        &self.coordination
    }

    pub fn broker(&self) -> &ServiceController<B> {
        &self.broker
    }

    /// `host:port` clients use to reach the broker.
    pub fn bootstrap_servers(&self) -> Option<String> {
        self.broker.bind_address()
    }

    /// `host:port` of the coordination service.
    pub fn coordination_address(&self) -> Option<String> {
        self.coordination.bind_address()
    }

    /// Stop the broker, then the coordination service, then delete every
    /// owned directory. Never aborts half-way.
    pub async fn close(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        info!("Shutting down {}", self.broker.name());
        self.broker.close().await;
        report.stopped.push(self.broker.name().to_string());

        info!("Shutting down {}", self.coordination.name());
        self.coordination.close().await;
        report.stopped.push(self.coordination.name().to_string());

        report.faults.extend(self.broker.shutdown_faults());
        report.faults.extend(self.coordination.shutdown_faults());
        if report.is_clean() {
            info!("Embedded stack shut down cleanly");
        } else {
            error!(
                "Embedded stack shut down with {} swallowed fault(s)",
                report.faults.len()
            );
        }
        report
    }
}

async fn await_running<S: EmbeddedServer>(
    controller: &ServiceController<S>,
    limit: Option<Duration>,
) -> Result<Endpoint, HarnessError> {
    match limit {
        Some(limit) => controller.await_running_for(limit).await,
        None => controller.await_running().await,
    }
}
