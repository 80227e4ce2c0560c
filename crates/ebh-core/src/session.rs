//! One test context: merged configuration, a running stack, provisioned
//! topics and a client resolver bound to the broker.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info};

use crate::client::{ClientArgumentResolver, ClientFactory};
use crate::config::{MergedConfig, ScopeChain};
use crate::error::{HarnessError, LifecycleError};
use crate::exposure::{AddressSink, BOOTSTRAP_SERVERS_KEY, COORDINATION_CONNECT_KEY};
use crate::lifecycle::{EmbeddedServer, keys};
use crate::orchestrator::{EmbeddedStack, StackSettings, TeardownReport};
use crate::properties::{PropertyMap, overlay};
use crate::topics::provision_topics;

/// Knobs for [`EmbeddedSession::start`].
#[derive(Default)]
pub struct SessionOptions {
    /// Resources and base broker properties. Properties merged from the
    /// scope chain are laid over `stack.broker_properties`.
    pub stack: StackSettings,
    /// Where addresses are published when a scope asks for it.
    pub sink: Option<Arc<dyn AddressSink>>,
}

impl SessionOptions {
    pub fn with_sink(mut self, sink: Arc<dyn AddressSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("stack", &self.stack)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

pub struct EmbeddedSession<C: EmbeddedServer, B: EmbeddedServer, F: ClientFactory> {
    stack: EmbeddedStack<C, B>,
    config: MergedConfig,
    resolver: ClientArgumentResolver<F>,
    sink: Option<Arc<dyn AddressSink>>,
    exposed: Mutex<Vec<&'static str>>,
}

impl<C: EmbeddedServer, B: EmbeddedServer, F: ClientFactory> EmbeddedSession<C, B, F> {
    /// Merge `chain`, boot the stack, create the declared topics and publish
    /// addresses if requested.
    ///
    /// Configuration errors are reported before any service is started. If a
    /// later step fails the stack is torn down before returning.
    pub async fn start(
        chain: &ScopeChain,
        coordination: C,
        broker: B,
        factory: F,
        options: SessionOptions,
    ) -> Result<Self, HarnessError> {
        let config = chain.merge()?;
        let SessionOptions { mut stack, sink } = options;
        overlay(&mut stack.broker_properties, &config.broker_properties);

        let stack = EmbeddedStack::start(coordination, broker, stack).await?;
        let bootstrap = match stack.bootstrap_servers() {
            Some(address) => address,
            None => {
                let err = LifecycleError::NotRunning {
                    service: stack.broker().name().to_string(),
                    state: stack.broker().state(),
                };
                stack.close().await;
                return Err(err.into());
            }
        };

        if let Err(e) = provision_topics(&factory, &bootstrap, &config.topics).await {
            error!("Topic provisioning failed: {e}");
            stack.close().await;
            return Err(e);
        }

        let mut defaults = PropertyMap::new();
        defaults.insert(keys::BOOTSTRAP_SERVERS.to_string(), bootstrap.clone());
        let session = Self {
            resolver: ClientArgumentResolver::new(Arc::new(factory), defaults),
            stack,
            config,
            sink,
            exposed: Mutex::new(Vec::new()),
        };
        session.expose_addresses();
        info!("Embedded session ready, bootstrap servers {bootstrap}");
        Ok(session)
    }

    fn expose_addresses(&self) {
        if !self.config.expose_addresses {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };
        let mut exposed = self.exposed.lock().unwrap_or_else(PoisonError::into_inner);
        let addresses = [
            (BOOTSTRAP_SERVERS_KEY, self.stack.bootstrap_servers()),
            (COORDINATION_CONNECT_KEY, self.stack.coordination_address()),
        ];
        for (key, address) in addresses {
            if let Some(address) = address {
                info!("Exposing {key}={address}");
                sink.publish(key, &address);
                exposed.push(key);
            }
        }
    }

    pub fn resolver(&self) -> &ClientArgumentResolver<F> {
        &self.resolver
    }

    pub fn config(&self) -> &MergedConfig {
        &self.config
    }

    pub fn stack(&self) -> &EmbeddedStack<C, B> {
        &self.stack
    }

    pub fn bootstrap_servers(&self) -> Option<String> {
        self.stack.bootstrap_servers()
    }

    /// Retract published addresses, then stop the broker and the
    /// coordination service. Safe to call more than once.
    pub async fn close(&self) -> TeardownReport {
        if let Some(sink) = &self.sink {
            let mut exposed = self.exposed.lock().unwrap_or_else(PoisonError::into_inner);
            for key in exposed.drain(..) {
                sink.retract(key);
            }
        }
        self.stack.close().await
    }
}
