//! Injection of producer/consumer clients into test parameters.

use std::sync::Arc;

use tracing::{debug, warn};

use super::disposable::Disposable;
use super::request::{ClientRequest, DeclaredShape, ParameterDescriptor, Role};
use super::traits::{ClientFactory, ConsumerClient, ProducerClient};
use crate::error::HarnessError;
use crate::lifecycle::keys;
use crate::properties::{PropertyMap, overlay};

/// Value handed to a test parameter.
pub enum ResolvedArgument<P, C> {
    Producer(Disposable<P>),
    Consumer(Disposable<C>),
    /// Raw client properties; nothing to clean up.
    Properties(PropertyMap),
}

impl<P, C> ResolvedArgument<P, C> {
    pub fn into_producer(self) -> Option<Disposable<P>> {
        match self {
            Self::Producer(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_consumer(self) -> Option<Disposable<C>> {
        match self {
            Self::Consumer(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_properties(self) -> Option<PropertyMap> {
        match self {
            Self::Properties(p) => Some(p),
            _ => None,
        }
    }
}

impl<P, C> std::fmt::Debug for ResolvedArgument<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Producer(_) => f.write_str("ResolvedArgument::Producer"),
            Self::Consumer(_) => f.write_str("ResolvedArgument::Consumer"),
            Self::Properties(p) => f.debug_tuple("ResolvedArgument::Properties").field(p).finish(),
        }
    }
}

/// Builds clients for test parameters from the session's client defaults.
pub struct ClientArgumentResolver<F: ClientFactory> {
    factory: Arc<F>,
    defaults: PropertyMap,
}

impl<F: ClientFactory> Clone for ClientArgumentResolver<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            defaults: self.defaults.clone(),
        }
    }
}

impl<F: ClientFactory> ClientArgumentResolver<F> {
    /// `defaults` are the lowest-precedence client properties, typically
    /// just `bootstrap.servers`.
    pub fn new(factory: Arc<F>, defaults: PropertyMap) -> Self {
        Self { factory, defaults }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn defaults(&self) -> &PropertyMap {
        &self.defaults
    }

    /// Whether the parameter's shape is one this resolver can build.
    pub fn supports(&self, parameter: &ParameterDescriptor) -> bool {
        !matches!(parameter.shape, DeclaredShape::Other(_))
    }

    /// Final client properties for a classified request.
    pub fn client_properties(&self, request: &ClientRequest) -> PropertyMap {
        let mut properties = self.defaults.clone();
        overlay(&mut properties, &request.properties);
        properties
    }

    /// Build the argument for `parameter`.
    ///
    /// `Ok(None)` means "not applicable". Configuration errors are raised
    /// before the factory is touched. A consumer with topics is subscribed
    /// here; its cleanup unsubscribes and then closes it.
    pub async fn resolve(
        &self,
        parameter: &ParameterDescriptor,
    ) -> Result<Option<ResolvedArgument<F::Producer, F::Consumer>>, HarnessError> {
        let Some(request) = ClientRequest::classify(parameter)? else {
            return Ok(None);
        };
        let mut properties = self.client_properties(&request);

        if !request.typed {
            debug!("Injecting {} properties into '{}'", request.role, request.parameter);
            return Ok(Some(ResolvedArgument::Properties(properties)));
        }

        match request.role {
            Role::Producer => {
                let producer = self.factory.producer(&properties)?;
                debug!("Injecting producer into '{}'", request.parameter);
                Ok(Some(ResolvedArgument::Producer(Disposable::new(
                    producer,
                    |p: &mut F::Producer| p.close(),
                ))))
            }
            Role::Consumer if request.topics.is_empty() => {
                let consumer = self.factory.consumer(&properties)?;
                debug!("Injecting unsubscribed consumer into '{}'", request.parameter);
                Ok(Some(ResolvedArgument::Consumer(Disposable::new(
                    consumer,
                    |c: &mut F::Consumer| c.close(),
                ))))
            }
            Role::Consumer => {
                properties
                    .entry(keys::GROUP_ID.to_string())
                    .or_insert_with(|| format!("embedded-{}", uuid::Uuid::new_v4()));
                let mut consumer = self.factory.consumer(&properties)?;
                if let Err(e) = consumer.subscribe(&request.topics).await {
                    warn!(
                        "Subscribing '{}' to {:?} failed: {e}",
                        request.parameter, request.topics
                    );
                    consumer.close();
                    return Err(e.into());
                }
                debug!(
                    "Injecting consumer subscribed to {:?} into '{}'",
                    request.topics, request.parameter
                );
                Ok(Some(ResolvedArgument::Consumer(Disposable::new(
                    consumer,
                    |c: &mut F::Consumer| {
                        c.unsubscribe();
                        c.close();
                    },
                ))))
            }
        }
    }
}
