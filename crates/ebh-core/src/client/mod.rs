//! Client parameter resolution.
//!
//! A test parameter is described by a [`ParameterDescriptor`]: its declared
//! shape, the key/value [`TypeTag`]s it carries and any role annotation. The
//! [`ClientArgumentResolver`] classifies it, fills in (de)serializer classes
//! and builds the client through a [`ClientFactory`].

mod codec;
mod disposable;
mod request;
mod resolver;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::{Codec, TypeTag};
pub use disposable::Disposable;
pub use request::{
    ClientRequest, ConsumerAnnotation, DeclaredShape, ParameterDescriptor, ProducerAnnotation,
    Role,
};
pub use resolver::{ClientArgumentResolver, ResolvedArgument};
pub use traits::{AdminClient, ClientFactory, ConsumerClient, ProducerClient, TopicCreation};
