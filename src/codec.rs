use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::message::{Message, MessageKind, Payload};

/// Turns messages and responses into bytes and back.
///
/// Implementations must round-trip structurally, nested references and
/// identifiers included.
pub trait Codec: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Message>;
    fn encode_response(&self, response: &Payload) -> Result<Vec<u8>>;
    fn decode_response(&self, bytes: &[u8]) -> Result<Payload>;

    fn decode_tagged(&self, bytes: &[u8]) -> Result<(MessageKind, Message)> {
        let message = self.decode(bytes)?;
        Ok((message.kind(), message))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pub pretty: bool,
}

impl JsonCodec {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(message)?
        } else {
            serde_json::to_vec(message)?
        };
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        serde_json::from_slice(bytes)
            .map_err(|err| ProtocolError::Codec(format!("invalid message: {err}")))
    }

    fn encode_response(&self, response: &Payload) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<Payload> {
        serde_json::from_slice(bytes)
            .map_err(|err| ProtocolError::Codec(format!("invalid response: {err}")))
    }
}

/// Pre-serialized intermediate form, used when re-framing log entries.
pub fn simplify(message: &Message) -> Result<Value> {
    Ok(serde_json::to_value(message)?)
}

/// Inverse of [`simplify`].
pub fn detail(value: Value) -> Result<Message> {
    serde_json::from_value(value)
        .map_err(|err| ProtocolError::Codec(format!("invalid simplified message: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ActorId, ObjectId};
    use crate::message::PointerRef;

    fn nested_command() -> Message {
        Message::command(
            "add",
            PointerRef {
                location: ActorId::from("plan-3"),
                id_at_location: ObjectId(11),
            },
            vec![
                Payload::Int(1),
                Payload::Seq(vec![
                    Payload::Float(0.5),
                    Payload::Actor(ActorId::from("alice")),
                    Payload::Seq(vec![Payload::Id(ObjectId(11)), Payload::None]),
                ]),
            ],
            vec![ObjectId(12)],
        )
    }

    #[test]
    fn json_codec_round_trips_nested_references() {
        let codec = JsonCodec::default();
        let msg = nested_command();
        let bytes = codec.encode(&msg).expect("encode");
        let (kind, back) = codec.decode_tagged(&bytes).expect("decode");
        assert_eq!(kind, MessageKind::Command);
        assert_eq!(back, msg);
    }

    #[test]
    fn simplified_form_is_tagged_by_kind() {
        let value = simplify(&nested_command()).expect("simplify");
        assert_eq!(value["kind"], "command");
        assert_eq!(value["target"]["location"], "plan-3");
        let back = detail(value).expect("detail");
        assert_eq!(back, nested_command());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = JsonCodec::default().decode(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Codec(_)), "{err:#}");
        let err = detail(serde_json::json!({"kind": "telepathy"})).unwrap_err();
        assert!(err.to_string().contains("invalid simplified message"), "{err:#}");
    }
}
