use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{ActorId, ObjectId};
use crate::plan::PlanSnapshot;

/// Address half of a remote reference: the actor holding the object and the
/// object's id there. This is the form references take inside messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointerRef {
    pub location: ActorId,
    pub id_at_location: ObjectId,
}

/// Arbitrarily nested message contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Payload {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Id(ObjectId),
    Actor(ActorId),
    Pointer(PointerRef),
    Seq(Vec<Payload>),
}

impl Payload {
    pub fn is_none(&self) -> bool {
        matches!(self, Payload::None)
    }

    pub fn as_id(&self) -> Option<ObjectId> {
        match self {
            Payload::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Payload]> {
        match self {
            Payload::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn ids(ids: &[ObjectId]) -> Payload {
        Payload::Seq(ids.iter().copied().map(Payload::Id).collect())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => f.write_str("None"),
            Payload::Bool(b) => write!(f, "{b}"),
            Payload::Int(i) => write!(f, "{i}"),
            Payload::Float(x) => write!(f, "{x}"),
            Payload::Str(s) => write!(f, "{s:?}"),
            Payload::Id(id) => write!(f, "#{id}"),
            Payload::Actor(a) => write!(f, "@{a}"),
            Payload::Pointer(p) => write!(f, "{}:{}", p.location, p.id_at_location),
            Payload::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Payload::Int(v)
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Float(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::Str(v.to_string())
    }
}

impl From<PointerRef> for Payload {
    fn from(v: PointerRef) -> Self {
        Payload::Pointer(v)
    }
}

/// Request to run `operation` on `target`, storing results under
/// `return_ids` at the target's actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub operation: String,
    pub target: PointerRef,
    pub args: Vec<Payload>,
    pub return_ids: Vec<ObjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Object,
    ObjectRequest,
    IsNoneQuery,
    ShapeQuery,
    Command,
    DeleteObject,
    Redistribute,
    MaterializePlan,
}

impl MessageKind {
    /// Kinds whose sender cannot proceed without a real value back.
    pub fn requires_value(self) -> bool {
        matches!(
            self,
            MessageKind::ObjectRequest | MessageKind::IsNoneQuery | MessageKind::ShapeQuery
        )
    }

    /// Object messages carry data, not instructions, and are never recorded.
    pub fn is_instruction(self) -> bool {
        !matches!(self, MessageKind::Object)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Object => "OBJECT",
            MessageKind::ObjectRequest => "OBJECT_REQUEST",
            MessageKind::IsNoneQuery => "IS_NONE_QUERY",
            MessageKind::ShapeQuery => "SHAPE_QUERY",
            MessageKind::Command => "COMMAND",
            MessageKind::DeleteObject => "DELETE_OBJECT",
            MessageKind::Redistribute => "REDISTRIBUTE",
            MessageKind::MaterializePlan => "MATERIALIZE_PLAN",
        };
        f.write_str(name)
    }
}

/// Unit transmitted between actors, in its pre-serialization form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Object { id: ObjectId, value: Payload },
    ObjectRequest { id: ObjectId },
    IsNoneQuery { id: ObjectId },
    ShapeQuery { id: ObjectId },
    Command(Command),
    DeleteObject { id: ObjectId },
    /// Deliver `inner` to the receiver and every member it officially knows.
    Redistribute { inner: Box<Message> },
    /// Store a relocated plan under `id` at the receiver.
    MaterializePlan { id: ObjectId, snapshot: Box<PlanSnapshot> },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Object { .. } => MessageKind::Object,
            Message::ObjectRequest { .. } => MessageKind::ObjectRequest,
            Message::IsNoneQuery { .. } => MessageKind::IsNoneQuery,
            Message::ShapeQuery { .. } => MessageKind::ShapeQuery,
            Message::Command(_) => MessageKind::Command,
            Message::DeleteObject { .. } => MessageKind::DeleteObject,
            Message::Redistribute { .. } => MessageKind::Redistribute,
            Message::MaterializePlan { .. } => MessageKind::MaterializePlan,
        }
    }

    pub fn command(
        operation: impl Into<String>,
        target: PointerRef,
        args: Vec<Payload>,
        return_ids: Vec<ObjectId>,
    ) -> Self {
        Message::Command(Command {
            operation: operation.into(),
            target,
            args,
            return_ids,
        })
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            Message::Command(cmd) => Some(cmd),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_queries_require_a_response() {
        assert!(MessageKind::ObjectRequest.requires_value());
        assert!(MessageKind::IsNoneQuery.requires_value());
        assert!(MessageKind::ShapeQuery.requires_value());
        assert!(!MessageKind::Command.requires_value());
        assert!(!MessageKind::Object.is_instruction());
        assert!(MessageKind::Command.is_instruction());
    }

    #[test]
    fn kind_matches_variant() {
        let msg = Message::command(
            "add",
            PointerRef {
                location: ActorId::from("alice"),
                id_at_location: ObjectId(1),
            },
            vec![Payload::Int(1)],
            vec![ObjectId(2)],
        );
        assert_eq!(msg.kind(), MessageKind::Command);
        assert_eq!(msg.kind().to_string(), "COMMAND");
        assert_eq!(msg.as_command().map(|c| c.operation.as_str()), Some("add"));
        assert_eq!(
            Message::DeleteObject { id: ObjectId(3) }.kind(),
            MessageKind::DeleteObject
        );
    }
}
