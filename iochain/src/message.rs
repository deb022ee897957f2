//! The payload type carried through the chain.

use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A message flowing through a filter chain.
///
/// The engine treats payloads as opaque. Byte buffers are recognised so that
/// read/write byte counters can be maintained; anything else travels as a
/// type-erased object that codec filters may downcast.
#[derive(Clone)]
pub enum Message {
    /// A raw byte buffer.
    Bytes(Bytes),
    /// Any decoded application object.
    Object(Arc<dyn Any + Send + Sync>),
}

impl Message {
    /// Creates a byte-buffer message.
    pub fn bytes(buf: impl Into<Bytes>) -> Self {
        Message::Bytes(buf.into())
    }

    /// Creates an object message.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Message::Object(Arc::new(value))
    }

    /// Number of bytes this message accounts for, `0` for objects.
    pub fn byte_len(&self) -> usize {
        match self {
            Message::Bytes(buf) => buf.len(),
            Message::Object(_) => 0,
        }
    }

    /// Returns the buffer if this is a byte message.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Message::Bytes(buf) => Some(buf),
            Message::Object(_) => None,
        }
    }

    /// Downcasts an object message to a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Message::Bytes(_) => None,
            Message::Object(obj) => obj.downcast_ref::<T>(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Bytes(buf) => write!(f, "Bytes({} bytes)", buf.len()),
            Message::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<Bytes> for Message {
    fn from(buf: Bytes) -> Self {
        Message::Bytes(buf)
    }
}

impl From<Vec<u8>> for Message {
    fn from(buf: Vec<u8>) -> Self {
        Message::Bytes(Bytes::from(buf))
    }
}

impl From<&'static str> for Message {
    fn from(text: &'static str) -> Self {
        Message::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_counts_only_buffers() {
        assert_eq!(Message::from("hello").byte_len(), 5);
        assert_eq!(Message::object(42u32).byte_len(), 0);
    }

    #[test]
    fn downcast_object() {
        let msg = Message::object(String::from("decoded"));
        assert_eq!(msg.downcast_ref::<String>().map(String::as_str), Some("decoded"));
        assert!(msg.downcast_ref::<u32>().is_none());
        assert!(msg.as_bytes().is_none());
    }
}
