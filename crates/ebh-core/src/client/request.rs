//! Test-parameter descriptors and their classification into client requests.

use super::codec::{Codec, TypeTag};
use crate::error::ConfigError;
use crate::lifecycle::keys;
use crate::properties::{PropertyMap, parse_properties};

/// Runtime shape of a declared test parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredShape {
    /// A typed producer client.
    Producer,
    /// A typed consumer client.
    Consumer,
    /// A raw `key → value` property map.
    PropertyMap,
    /// Anything else; not resolvable by this resolver.
    Other(String),
}

impl std::fmt::Display for DeclaredShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Producer => write!(f, "producer"),
            Self::Consumer => write!(f, "consumer"),
            Self::PropertyMap => write!(f, "property map"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }

    fn codec_kind(self) -> &'static str {
        match self {
            Self::Producer => "serializer",
            Self::Consumer => "deserializer",
        }
    }

    fn codec_keys(self) -> (&'static str, &'static str) {
        match self {
            Self::Producer => (keys::KEY_SERIALIZER, keys::VALUE_SERIALIZER),
            Self::Consumer => (keys::KEY_DESERIALIZER, keys::VALUE_DESERIALIZER),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer-role annotation on a parameter. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerAnnotation {
    /// `key=value` client property overrides.
    pub properties: Vec<String>,
    pub key_serializer: Option<String>,
    pub value_serializer: Option<String>,
}

impl ProducerAnnotation {
    pub fn with_property(mut self, entry: impl Into<String>) -> Self {
        self.properties.push(entry.into());
        self
    }

    pub fn with_serializers(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_serializer = Some(key.into());
        self.value_serializer = Some(value.into());
        self
    }
}

/// Consumer-role annotation on a parameter. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerAnnotation {
    /// `key=value` client property overrides.
    pub properties: Vec<String>,
    pub key_deserializer: Option<String>,
    pub value_deserializer: Option<String>,
    /// Topics to subscribe to before the test body runs.
    pub topics: Vec<String>,
}

impl ConsumerAnnotation {
    pub fn with_property(mut self, entry: impl Into<String>) -> Self {
        self.properties.push(entry.into());
        self
    }

    pub fn with_deserializers(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_deserializer = Some(key.into());
        self.value_deserializer = Some(value.into());
        self
    }

    pub fn subscribed_to<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }
}

/// What the test framework knows about one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub shape: DeclaredShape,
    /// Generic key/value type arguments, when the declared type carries them.
    pub type_arguments: Option<(TypeTag, TypeTag)>,
    pub producer: Option<ProducerAnnotation>,
    pub consumer: Option<ConsumerAnnotation>,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, shape: DeclaredShape) -> Self {
        Self {
            name: name.into(),
            shape,
            type_arguments: None,
            producer: None,
            consumer: None,
        }
    }

    /// A producer typed over `K`/`V`.
    pub fn producer<K: ?Sized + 'static, V: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredShape::Producer).with_types(TypeTag::of::<K>(), TypeTag::of::<V>())
    }

    /// A consumer typed over `K`/`V`.
    pub fn consumer<K: ?Sized + 'static, V: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredShape::Consumer).with_types(TypeTag::of::<K>(), TypeTag::of::<V>())
    }

    pub fn property_map(name: impl Into<String>) -> Self {
        Self::new(name, DeclaredShape::PropertyMap)
    }

    pub fn with_types(mut self, key: TypeTag, value: TypeTag) -> Self {
        self.type_arguments = Some((key, value));
        self
    }

    pub fn annotated_producer(mut self, annotation: ProducerAnnotation) -> Self {
        self.producer = Some(annotation);
        self
    }

    pub fn annotated_consumer(mut self, annotation: ConsumerAnnotation) -> Self {
        self.consumer = Some(annotation);
        self
    }
}

/// A parameter the resolver has decided how to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub parameter: String,
    pub role: Role,
    /// `false` when the test asked for the raw property map.
    pub typed: bool,
    /// Annotation properties plus the resolved (de)serializer classes.
    pub properties: PropertyMap,
    pub topics: Vec<String>,
}

impl ClientRequest {
    /// Classify `parameter`. `Ok(None)` means the shape is not one this
    /// resolver handles. Every configuration error is raised here, before any
    /// client is built.
    pub fn classify(parameter: &ParameterDescriptor) -> Result<Option<Self>, ConfigError> {
        if parameter.producer.is_some() && parameter.consumer.is_some() {
            return Err(ConfigError::ConflictingRoles {
                parameter: parameter.name.clone(),
            });
        }
        if let DeclaredShape::Other(_) = parameter.shape {
            return Ok(None);
        }

        let annotated = match (&parameter.producer, &parameter.consumer) {
            (Some(_), _) => Some(Role::Producer),
            (_, Some(_)) => Some(Role::Consumer),
            _ => None,
        };
        let (role, typed) = match (&parameter.shape, annotated) {
            (DeclaredShape::Producer, None | Some(Role::Producer)) => (Role::Producer, true),
            (DeclaredShape::Consumer, None | Some(Role::Consumer)) => (Role::Consumer, true),
            (DeclaredShape::PropertyMap, Some(role)) => (role, false),
            (DeclaredShape::PropertyMap, None) => {
                return Err(ConfigError::AmbiguousRole {
                    parameter: parameter.name.clone(),
                    shape: parameter.shape.to_string(),
                });
            }
            (shape, Some(role)) => {
                return Err(ConfigError::RoleMismatch {
                    parameter: parameter.name.clone(),
                    shape: shape.to_string(),
                    role: role.as_str(),
                });
            }
            (DeclaredShape::Other(_), None) => return Ok(None),
        };

        let (entries, explicit, topics) = match role {
            Role::Producer => {
                let a = parameter.producer.clone().unwrap_or_default();
                (a.properties, (a.key_serializer, a.value_serializer), Vec::new())
            }
            Role::Consumer => {
                let a = parameter.consumer.clone().unwrap_or_default();
                (
                    a.properties,
                    (a.key_deserializer, a.value_deserializer),
                    a.topics,
                )
            }
        };

        let (key_key, value_key) = role.codec_keys();
        let mut properties = PropertyMap::new();
        if typed {
            let (key_tag, value_tag) = match &parameter.type_arguments {
                Some((k, v)) => (Some(k), Some(v)),
                None => (None, None),
            };
            let key_class = codec_class(parameter, role, "key", explicit.0, key_tag)?;
            let value_class = codec_class(parameter, role, "value", explicit.1, value_tag)?;
            properties.insert(key_key.to_string(), key_class);
            properties.insert(value_key.to_string(), value_class);
        } else {
            if let Some(class) = explicit.0 {
                properties.insert(key_key.to_string(), class);
            }
            if let Some(class) = explicit.1 {
                properties.insert(value_key.to_string(), class);
            }
        }
        // Annotation properties win over inferred classes.
        properties.extend(parse_properties(&entries)?);

        Ok(Some(Self {
            parameter: parameter.name.clone(),
            role,
            typed,
            properties,
            topics,
        }))
    }
}

/// Explicit class, else the table default for the type tag, else an error
/// naming the type.
fn codec_class(
    parameter: &ParameterDescriptor,
    role: Role,
    position: &str,
    explicit: Option<String>,
    tag: Option<&TypeTag>,
) -> Result<String, ConfigError> {
    if let Some(class) = explicit {
        return Ok(class);
    }
    let codec = tag.and_then(Codec::for_type);
    match codec {
        Some(codec) => Ok(match role {
            Role::Producer => codec.serializer_class(),
            Role::Consumer => codec.deserializer_class(),
        }),
        None => Err(ConfigError::UnknownCodec {
            parameter: parameter.name.clone(),
            kind: role.codec_kind(),
            role: role.as_str(),
            type_description: match tag {
                Some(tag) => format!("{position} type {tag}"),
                None => format!("undeclared {position} type"),
            },
        }),
    }
}
