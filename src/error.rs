use thiserror::Error;

use crate::ids::{ActorId, ObjectId};

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown actor '{0}'")]
    UnknownActor(ActorId),

    #[error("actor '{0}' is already registered")]
    DuplicateActor(ActorId),

    /// The transport could not reach the destination. Never retried here.
    #[error("failed to deliver message to '{destination}': {reason}")]
    Delivery { destination: ActorId, reason: String },

    #[error("plan {plan} already has location '{location}'")]
    DoubleRelocation { plan: ObjectId, location: ActorId },

    /// A log entry could not be traversed or decoded. Replaying a partially
    /// rewritten log would corrupt results, so this is always fatal.
    #[error("malformed log in plan {plan} at entry {index}: {reason}")]
    MalformedLog {
        plan: ObjectId,
        index: usize,
        reason: String,
    },

    #[error("object {object} not found at '{actor}'")]
    UnknownObject { actor: ActorId, object: ObjectId },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("execution failed at '{actor}': {message}")]
    Execution { actor: ActorId, message: String },

    #[error("plan {plan}: {message}")]
    InvalidState { plan: ObjectId, message: String },

    #[error("plan {plan} log exceeds {limit} entries")]
    LogOverflow { plan: ObjectId, limit: usize },

    #[error("actor '{0}' outlived its runtime")]
    Detached(ActorId),

    #[error(
        "replay of plan {plan} (owner={owner}, location={location}) failed at message {index}"
    )]
    Replay {
        plan: ObjectId,
        owner: ActorId,
        location: String,
        index: usize,
        #[source]
        source: Box<ProtocolError>,
    },

    #[error("invalid config: {0}")]
    Config(String),
}

impl ProtocolError {
    pub fn execution(actor: &ActorId, message: impl Into<String>) -> Self {
        ProtocolError::Execution {
            actor: actor.clone(),
            message: message.into(),
        }
    }

    pub fn delivery(destination: &ActorId, reason: impl Into<String>) -> Self {
        ProtocolError::Delivery {
            destination: destination.clone(),
            reason: reason.into(),
        }
    }

    /// Strip replay wrappers and return the error that actually failed.
    pub fn root(&self) -> &ProtocolError {
        match self {
            ProtocolError::Replay { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_error_names_every_hop() {
        let err = ProtocolError::Replay {
            plan: ObjectId(7),
            owner: ActorId::from("alice"),
            location: "bob".to_string(),
            index: 2,
            source: Box::new(ProtocolError::UnknownObject {
                actor: ActorId::from("bob"),
                object: ObjectId(42),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("plan 7"), "{msg}");
        assert!(msg.contains("owner=alice"), "{msg}");
        assert!(msg.contains("location=bob"), "{msg}");
        assert!(msg.contains("message 2"), "{msg}");
        assert!(matches!(
            err.root(),
            ProtocolError::UnknownObject { object, .. } if *object == ObjectId(42)
        ));
    }
}
