use std::any::Any;
use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use msgrelay_frame::{split_segment, MessageId};
use tracing::trace;

use crate::error::MessageError;

/// Id of the built-in [`ResponseMessage`].
pub const RESPONSE_MESSAGE_ID: MessageId = 1;
/// Id of the built-in [`FinishMessage`].
pub const FINISH_MESSAGE_ID: MessageId = 2;
/// Id of the built-in [`QuitMessage`].
pub const QUIT_MESSAGE_ID: MessageId = 3;

/// A typed message that can travel over a connection.
pub trait Message: Any {
    /// Identifier written in front of the encoded payload.
    fn message_id(&self) -> MessageId;

    /// Append the encoded payload to `dst`.
    fn encode(&self, dst: &mut BytesMut);

    fn as_any(&self) -> &dyn Any;
}

impl dyn Message {
    /// Downcast to a concrete message type.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf
    }
}

impl std::fmt::Debug for dyn Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.message_id())
            .finish_non_exhaustive()
    }
}

/// A message type that can be rebuilt from its payload.
pub trait DecodeMessage: Message + Sized {
    const MESSAGE_ID: MessageId;

    fn decode(payload: &[u8]) -> Result<Self, MessageError>;
}

type Factory = Box<dyn Fn(&[u8]) -> Result<Box<dyn Message>, MessageError>>;

/// Maps message ids to factories that decode a payload into a message.
#[derive(Default)]
pub struct MessageRegistry {
    factories: HashMap<MessageId, Factory>,
}

impl MessageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that knows the built-in messages.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.insert::<ResponseMessage>();
        registry.insert::<FinishMessage>();
        registry.insert::<QuitMessage>();
        registry
    }

    /// Register a factory for `id`.
    pub fn register(
        &mut self,
        id: MessageId,
        factory: impl Fn(&[u8]) -> Result<Box<dyn Message>, MessageError> + 'static,
    ) -> Result<(), MessageError> {
        if self.factories.contains_key(&id) {
            return Err(MessageError::DuplicateId(id));
        }
        self.factories.insert(id, Box::new(factory));
        Ok(())
    }

    /// Register a [`DecodeMessage`] type under its own id.
    pub fn register_message<M: DecodeMessage>(&mut self) -> Result<(), MessageError> {
        self.register(M::MESSAGE_ID, decode_boxed::<M>)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.factories.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Decode a data segment (message id followed by payload).
    ///
    /// Returns `None` for segments too short to carry an id, for unknown ids
    /// and for payloads the factory rejects.
    pub fn create(&self, segment: &[u8]) -> Option<Box<dyn Message>> {
        let Some((id, payload)) = split_segment(segment) else {
            trace!(len = segment.len(), "segment too short for a message id");
            return None;
        };
        let Some(factory) = self.factories.get(&id) else {
            trace!(id, len = payload.len(), "no factory for message id");
            return None;
        };
        match factory(payload) {
            Ok(message) => Some(message),
            Err(err) => {
                trace!(id, error = %err, "failed to decode message");
                None
            }
        }
    }

    fn insert<M: DecodeMessage>(&mut self) {
        self.factories
            .insert(M::MESSAGE_ID, Box::new(decode_boxed::<M>));
    }
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("MessageRegistry").field("ids", &ids).finish()
    }
}

fn decode_boxed<M: DecodeMessage>(payload: &[u8]) -> Result<Box<dyn Message>, MessageError> {
    Ok(Box::new(M::decode(payload)?))
}

fn decode_i32(id: MessageId, mut payload: &[u8]) -> Result<i32, MessageError> {
    if payload.len() != 4 {
        return Err(MessageError::Malformed {
            id,
            reason: format!("expected 4 bytes, got {}", payload.len()),
        });
    }
    Ok(payload.get_i32_le())
}

/// Raw bytes, used for replies written with `Connection::write_async`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub data: Bytes,
}

impl ResponseMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl Message for ResponseMessage {
    fn message_id(&self) -> MessageId {
        RESPONSE_MESSAGE_ID
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.data);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DecodeMessage for ResponseMessage {
    const MESSAGE_ID: MessageId = RESPONSE_MESSAGE_ID;

    fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self::new(Bytes::copy_from_slice(payload)))
    }
}

/// Tells the peer that a job finished with `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishMessage {
    pub status: i32,
}

impl Message for FinishMessage {
    fn message_id(&self) -> MessageId {
        FINISH_MESSAGE_ID
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i32_le(self.status);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DecodeMessage for FinishMessage {
    const MESSAGE_ID: MessageId = FINISH_MESSAGE_ID;

    fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let status = decode_i32(FINISH_MESSAGE_ID, payload)?;
        Ok(Self { status })
    }
}

/// Asks the peer to exit with `exit_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuitMessage {
    pub exit_code: i32,
}

impl Message for QuitMessage {
    fn message_id(&self) -> MessageId {
        QUIT_MESSAGE_ID
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i32_le(self.exit_code);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DecodeMessage for QuitMessage {
    const MESSAGE_ID: MessageId = QUIT_MESSAGE_ID;

    fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let exit_code = decode_i32(QUIT_MESSAGE_ID, payload)?;
        Ok(Self { exit_code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: MessageId, payload: &[u8]) -> Vec<u8> {
        let mut out = id.to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[derive(Debug, PartialEq)]
    struct Greeting(String);

    impl Message for Greeting {
        fn message_id(&self) -> MessageId {
            100
        }

        fn encode(&self, dst: &mut BytesMut) {
            dst.put_slice(self.0.as_bytes());
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl DecodeMessage for Greeting {
        const MESSAGE_ID: MessageId = 100;

        fn decode(payload: &[u8]) -> Result<Self, MessageError> {
            String::from_utf8(payload.to_vec())
                .map(Greeting)
                .map_err(|err| MessageError::Malformed {
                    id: 100,
                    reason: err.to_string(),
                })
        }
    }

    #[test]
    fn builtin_messages_decode() {
        let registry = MessageRegistry::with_builtin();
        assert_eq!(registry.len(), 3);

        let response = registry.create(&segment(RESPONSE_MESSAGE_ID, b"ok")).unwrap();
        assert_eq!(
            response.downcast_ref::<ResponseMessage>(),
            Some(&ResponseMessage::new("ok"))
        );

        let finish = registry
            .create(&segment(FINISH_MESSAGE_ID, &(-2i32).to_le_bytes()))
            .unwrap();
        assert_eq!(
            finish.downcast_ref::<FinishMessage>(),
            Some(&FinishMessage { status: -2 })
        );

        let quit = registry
            .create(&segment(QUIT_MESSAGE_ID, &7i32.to_le_bytes()))
            .unwrap();
        assert_eq!(quit.message_id(), QUIT_MESSAGE_ID);
        assert!(quit.downcast_ref::<FinishMessage>().is_none());
    }

    #[test]
    fn unknown_and_malformed_segments_yield_none() {
        let registry = MessageRegistry::with_builtin();
        assert!(registry.create(&segment(999, b"??")).is_none());
        assert!(registry.create(&[1, 0]).is_none());
        assert!(registry.create(&segment(FINISH_MESSAGE_ID, b"xy")).is_none());
    }

    #[test]
    fn custom_message_registration() {
        let mut registry = MessageRegistry::new();
        registry.register_message::<Greeting>().unwrap();
        assert!(registry.contains(100));

        let message = registry.create(&segment(100, b"hello")).unwrap();
        assert_eq!(
            message.downcast_ref::<Greeting>(),
            Some(&Greeting("hello".into()))
        );
        assert!(registry.create(&segment(100, &[0xFF, 0xFE])).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = MessageRegistry::with_builtin();
        let err = registry.register_message::<QuitMessage>().unwrap_err();
        assert!(matches!(err, MessageError::DuplicateId(QUIT_MESSAGE_ID)));

        let err = registry
            .register(RESPONSE_MESSAGE_ID, |_| Ok(Box::new(QuitMessage { exit_code: 0 })))
            .unwrap_err();
        assert!(matches!(err, MessageError::DuplicateId(RESPONSE_MESSAGE_ID)));
    }

    #[test]
    fn encode_matches_decode_layout() {
        let message: Box<dyn Message> = Box::new(FinishMessage { status: 258 });
        assert_eq!(message.to_bytes().as_ref(), &[2, 1, 0, 0]);
    }
}
