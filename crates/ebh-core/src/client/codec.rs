//! Type tags and the fixed type → (de)serializer table.

use std::any::{TypeId, type_name};

/// Declared key or value type of a client parameter.
///
/// How the tag was obtained (generics, a schema, a hand-written descriptor)
/// does not matter to the resolver; [`TypeTag::of`] covers the Rust types
/// with a known codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    String,
    ByteArray,
    ByteBuffer,
    Bytes,
    Short,
    Int,
    Long,
    Float,
    Double,
    Uuid,
    Void,
    /// Any other type, by name. Has no default codec.
    Named(String),
}

impl TypeTag {
    /// Tag for a Rust type.
    pub fn of<T: ?Sized + 'static>() -> Self {
        let id = TypeId::of::<T>();
        if id == TypeId::of::<String>() || id == TypeId::of::<str>() {
            Self::String
        } else if id == TypeId::of::<Vec<u8>>() || id == TypeId::of::<[u8]>() {
            Self::ByteArray
        } else if id == TypeId::of::<i16>() {
            Self::Short
        } else if id == TypeId::of::<i32>() {
            Self::Int
        } else if id == TypeId::of::<i64>() {
            Self::Long
        } else if id == TypeId::of::<f32>() {
            Self::Float
        } else if id == TypeId::of::<f64>() {
            Self::Double
        } else if id == TypeId::of::<uuid::Uuid>() {
            Self::Uuid
        } else if id == TypeId::of::<()>() {
            Self::Void
        } else {
            Self::Named(type_name::<T>().to_string())
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "String"),
            Self::ByteArray => write!(f, "ByteArray"),
            Self::ByteBuffer => write!(f, "ByteBuffer"),
            Self::Bytes => write!(f, "Bytes"),
            Self::Short => write!(f, "Short"),
            Self::Int => write!(f, "Int"),
            Self::Long => write!(f, "Long"),
            Self::Float => write!(f, "Float"),
            Self::Double => write!(f, "Double"),
            Self::Uuid => write!(f, "UUID"),
            Self::Void => write!(f, "Void"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

const SERIALIZATION_PACKAGE: &str = "org.apache.kafka.common.serialization";

/// Built-in codecs, identified on the wire by their class names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    String,
    ByteArray,
    ByteBuffer,
    Bytes,
    Short,
    Integer,
    Long,
    Float,
    Double,
    Uuid,
    Void,
}

impl Codec {
    const ALL: [Codec; 11] = [
        Codec::String,
        Codec::ByteArray,
        Codec::ByteBuffer,
        Codec::Bytes,
        Codec::Short,
        Codec::Integer,
        Codec::Long,
        Codec::Float,
        Codec::Double,
        Codec::Uuid,
        Codec::Void,
    ];

    /// Default codec for a declared type; `None` for [`TypeTag::Named`].
    pub fn for_type(tag: &TypeTag) -> Option<Self> {
        Some(match tag {
            TypeTag::String => Self::String,
            TypeTag::ByteArray => Self::ByteArray,
            TypeTag::ByteBuffer => Self::ByteBuffer,
            TypeTag::Bytes => Self::Bytes,
            TypeTag::Short => Self::Short,
            TypeTag::Int => Self::Integer,
            TypeTag::Long => Self::Long,
            TypeTag::Float => Self::Float,
            TypeTag::Double => Self::Double,
            TypeTag::Uuid => Self::Uuid,
            TypeTag::Void => Self::Void,
            TypeTag::Named(_) => return None,
        })
    }

    fn stem(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::ByteArray => "ByteArray",
            Self::ByteBuffer => "ByteBuffer",
            Self::Bytes => "Bytes",
            Self::Short => "Short",
            Self::Integer => "Integer",
            Self::Long => "Long",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::Uuid => "UUID",
            Self::Void => "Void",
        }
    }

    pub fn serializer_class(self) -> String {
        format!("{SERIALIZATION_PACKAGE}.{}Serializer", self.stem())
    }

    pub fn deserializer_class(self) -> String {
        format!("{SERIALIZATION_PACKAGE}.{}Deserializer", self.stem())
    }

    /// Codec named by a serializer or deserializer class, fully qualified or
    /// simple (`StringSerializer`).
    pub fn from_class_name(class: &str) -> Option<Self> {
        let simple = class.rsplit('.').next().unwrap_or(class);
        let stem = simple
            .strip_suffix("Deserializer")
            .or_else(|| simple.strip_suffix("Serializer"))?;
        Self::ALL.into_iter().find(|codec| codec.stem() == stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_types_map_to_tags() {
        assert_eq!(TypeTag::of::<String>(), TypeTag::String);
        assert_eq!(TypeTag::of::<str>(), TypeTag::String);
        assert_eq!(TypeTag::of::<Vec<u8>>(), TypeTag::ByteArray);
        assert_eq!(TypeTag::of::<i32>(), TypeTag::Int);
        assert_eq!(TypeTag::of::<i64>(), TypeTag::Long);
        assert_eq!(TypeTag::of::<f64>(), TypeTag::Double);
        assert_eq!(TypeTag::of::<uuid::Uuid>(), TypeTag::Uuid);
        assert_eq!(TypeTag::of::<()>(), TypeTag::Void);
    }

    #[test]
    fn unknown_rust_types_are_named() {
        struct Order;
        match TypeTag::of::<Order>() {
            TypeTag::Named(name) => assert!(name.ends_with("Order"), "{name}"),
            other => panic!("expected Named, got {other:?}"),
        }
    }

    #[test]
    fn table_covers_every_builtin_tag() {
        assert_eq!(Codec::for_type(&TypeTag::String), Some(Codec::String));
        assert_eq!(Codec::for_type(&TypeTag::ByteArray), Some(Codec::ByteArray));
        assert_eq!(Codec::for_type(&TypeTag::Int), Some(Codec::Integer));
        assert_eq!(Codec::for_type(&TypeTag::Uuid), Some(Codec::Uuid));
        assert_eq!(Codec::for_type(&TypeTag::named("com.acme.Order")), None);
    }

    #[test]
    fn class_names_follow_the_serialization_package() {
        assert_eq!(
            Codec::String.serializer_class(),
            "org.apache.kafka.common.serialization.StringSerializer"
        );
        assert_eq!(
            Codec::Uuid.deserializer_class(),
            "org.apache.kafka.common.serialization.UUIDDeserializer"
        );
    }

    #[test]
    fn class_names_parse_back() {
        for codec in Codec::ALL {
            assert_eq!(Codec::from_class_name(&codec.serializer_class()), Some(codec));
            assert_eq!(Codec::from_class_name(&codec.deserializer_class()), Some(codec));
        }
        assert_eq!(Codec::from_class_name("LongSerializer"), Some(Codec::Long));
        assert_eq!(Codec::from_class_name("com.acme.OrderSerializer"), None);
        assert_eq!(Codec::from_class_name("NotACodec"), None);
    }
}
