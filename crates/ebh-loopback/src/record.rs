//! Record payloads and their codec checks.

use embedded_broker_harness_core::ClientError;
use embedded_broker_harness_core::client::Codec;
use serde::{Deserialize, Serialize};

/// A key or value as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Value {
    Null,
    String(String),
    Bytes(Vec<u8>),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Uuid(uuid::Uuid),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Uuid(_) => "uuid",
        }
    }

    /// Whether `codec` can carry this value. Null is accepted by every codec.
    pub fn fits(&self, codec: Codec) -> bool {
        matches!(
            (codec, self),
            (_, Self::Null)
                | (Codec::String, Self::String(_))
                | (Codec::ByteArray | Codec::ByteBuffer | Codec::Bytes, Self::Bytes(_))
                | (Codec::Short, Self::Short(_))
                | (Codec::Integer, Self::Int(_))
                | (Codec::Long, Self::Long(_))
                | (Codec::Float, Self::Float(_))
                | (Codec::Double, Self::Double(_))
                | (Codec::Uuid, Self::Uuid(_))
        )
    }

    /// Check the value against `codec`.
    pub fn checked(self, codec: Codec) -> Result<Self, ClientError> {
        if self.fits(codec) {
            Ok(self)
        } else {
            Err(ClientError::Serialization {
                codec: format!("{codec:?}"),
                found: format!("a {} value", self.kind()),
            })
        }
    }
}

/// Rust types a producer can send.
pub trait ToPayload {
    fn to_payload(self) -> Value;
}

/// Rust types a consumer can receive into.
pub trait FromPayload: Sized {
    fn from_payload(value: Value) -> Option<Self>;
}

macro_rules! payload {
    ($ty:ty, $variant:ident) => {
        impl ToPayload for $ty {
            fn to_payload(self) -> Value {
                Value::$variant(self)
            }
        }

        impl FromPayload for $ty {
            fn from_payload(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

payload!(String, String);
payload!(Vec<u8>, Bytes);
payload!(i16, Short);
payload!(i32, Int);
payload!(i64, Long);
payload!(f32, Float);
payload!(f64, Double);
payload!(uuid::Uuid, Uuid);

impl ToPayload for &str {
    fn to_payload(self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToPayload for &[u8] {
    fn to_payload(self) -> Value {
        Value::Bytes(self.to_vec())
    }
}

impl ToPayload for () {
    fn to_payload(self) -> Value {
        Value::Null
    }
}

impl FromPayload for () {
    fn from_payload(value: Value) -> Option<Self> {
        matches!(value, Value::Null).then_some(())
    }
}

impl<T: ToPayload> ToPayload for Option<T> {
    fn to_payload(self) -> Value {
        self.map(ToPayload::to_payload).unwrap_or(Value::Null)
    }
}

impl<T: FromPayload> FromPayload for Option<T> {
    fn from_payload(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_payload(other).map(Some),
        }
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub key: Value,
    pub value: Value,
}

/// A record handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord<K, V> {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
    pub timestamp: i64,
    pub key: K,
    pub value: V,
}

/// Where a produced record landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_fit_their_codecs_only() {
        assert!(Value::String("a".into()).fits(Codec::String));
        assert!(Value::Bytes(vec![1]).fits(Codec::ByteBuffer));
        assert!(Value::Null.fits(Codec::Long));
        assert!(!Value::Int(1).fits(Codec::Long));
        assert!(!Value::String("a".into()).fits(Codec::Void));
    }

    #[test]
    fn mismatch_names_codec_and_kind() {
        let err = Value::Long(7).checked(Codec::String).unwrap_err();
        assert_eq!(err.to_string(), "String cannot handle a long value");
    }

    #[test]
    fn payload_conversions() {
        assert_eq!("k".to_payload(), Value::String("k".into()));
        assert_eq!(Option::<i64>::None.to_payload(), Value::Null);
        assert_eq!(i64::from_payload(Value::Long(3)), Some(3));
        assert_eq!(i64::from_payload(Value::Int(3)), None);
        assert_eq!(
            Option::<String>::from_payload(Value::Null),
            Some(None)
        );
    }

    #[test]
    fn wire_format_is_tagged() {
        let json = serde_json::to_value(Value::String("v".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "string", "data": "v"}));
        let json = serde_json::to_value(Value::Null).unwrap();
        assert_eq!(json, serde_json::json!({"type": "null"}));
    }
}
