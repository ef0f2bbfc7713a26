use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::actor::{Actor, Worker};
use crate::codec::{Codec, JsonCodec};
use crate::config::RuntimeConfig;
use crate::error::{ProtocolError, Result};
use crate::ids::{ActorId, IdAllocator, ObjectId};
use crate::message::{Command, Message, Payload};
use crate::pointer::RemoteReference;

/// Opaque byte delivery to a named actor.
pub trait Transport: Send + Sync {
    fn deliver(&self, bytes: &[u8], destination: &ActorId) -> Result<Vec<u8>>;
}

/// Explicit context shared by every actor of one process: the actor
/// registry, the id allocator, the codec and an in-process transport.
pub struct Runtime {
    config: RuntimeConfig,
    codec: JsonCodec,
    ids: IdAllocator,
    actors: RwLock<BTreeMap<ActorId, Arc<dyn Actor>>>,
    unreachable: RwLock<BTreeSet<ActorId>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            codec: JsonCodec::new(config.codec_pretty),
            config,
            ids: IdAllocator::default(),
            actors: RwLock::new(BTreeMap::new()),
            unreachable: RwLock::new(BTreeSet::new()),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(RuntimeConfig::default())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn codec(&self) -> &dyn Codec {
        &self.codec
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Create an executing actor and register it under `id`.
    pub fn spawn_worker(self: &Arc<Self>, id: impl Into<ActorId>) -> Result<Arc<Worker>> {
        let worker = Arc::new(Worker::new(id.into(), Arc::downgrade(self)));
        self.register_actor(worker.clone())?;
        Ok(worker)
    }

    pub fn register_actor(&self, actor: Arc<dyn Actor>) -> Result<()> {
        let id = actor.id().clone();
        let mut actors = self.actors.write().unwrap_or_else(PoisonError::into_inner);
        if actors.contains_key(&id) {
            return Err(ProtocolError::DuplicateActor(id));
        }
        debug!(actor = %id, "registered actor");
        actors.insert(id, actor);
        Ok(())
    }

    pub fn deregister_actor(&self, id: &ActorId) -> Option<Arc<dyn Actor>> {
        self.actors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get_worker(&self, id: &ActorId) -> Result<Arc<dyn Actor>> {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownActor(id.clone()))
    }

    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Simulate a network partition: the actor stays known but the transport
    /// refuses to reach it.
    pub fn set_reachable(&self, id: &ActorId, reachable: bool) {
        let mut unreachable = self
            .unreachable
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if reachable {
            unreachable.remove(id);
        } else {
            unreachable.insert(id.clone());
        }
    }

    /// Encode, deliver and decode the response of one message.
    pub fn deliver(
        &self,
        sender: &ActorId,
        message: &Message,
        destination: &ActorId,
    ) -> Result<Payload> {
        let bytes = self.codec.encode(message)?;
        if bytes.len() > self.config.max_message_bytes {
            return Err(ProtocolError::delivery(
                destination,
                format!(
                    "message of {} bytes exceeds limit of {} bytes",
                    bytes.len(),
                    self.config.max_message_bytes
                ),
            ));
        }
        debug!(
            from = %sender,
            to = %destination,
            kind = %message.kind(),
            bytes = bytes.len(),
            "deliver"
        );
        let response = Transport::deliver(self, &bytes, destination).inspect_err(|err| {
            if matches!(err, ProtocolError::Delivery { .. }) {
                warn!(from = %sender, to = %destination, error = %err, "delivery failed");
            }
        })?;
        self.codec.decode_response(&response)
    }

    /// Deliver a command and hand back references to its pre-allocated
    /// result slots at `recipient`.
    pub fn send_command(
        self: &Arc<Self>,
        sender: &ActorId,
        command: Command,
        recipient: &ActorId,
    ) -> Result<Vec<RemoteReference>> {
        let return_ids = command.return_ids.clone();
        self.deliver(sender, &Message::Command(command), recipient)?;
        Ok(return_ids
            .into_iter()
            .map(|id| RemoteReference::result_at(self, recipient, id, sender))
            .collect())
    }

    /// Ship `value` to `recipient`, storing it there under `id`.
    pub fn send_object(
        self: &Arc<Self>,
        sender: &ActorId,
        id: ObjectId,
        value: Payload,
        recipient: &ActorId,
    ) -> Result<RemoteReference> {
        self.deliver(sender, &Message::Object { id, value }, recipient)?;
        Ok(RemoteReference::result_at(self, recipient, id, sender))
    }
}

impl Transport for Runtime {
    fn deliver(&self, bytes: &[u8], destination: &ActorId) -> Result<Vec<u8>> {
        let partitioned = self
            .unreachable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(destination);
        if partitioned {
            return Err(ProtocolError::delivery(destination, "actor is unreachable"));
        }
        let actor = self
            .get_worker(destination)
            .map_err(|_| ProtocolError::delivery(destination, "no route to actor"))?;
        actor.receive_bytes(&self.codec, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_worker_reports_unknown_actors() {
        let rt = Runtime::with_defaults();
        rt.spawn_worker("alice").expect("spawn");
        assert!(rt.get_worker(&ActorId::from("alice")).is_ok());
        let err = rt.get_worker(&ActorId::from("nobody")).err().expect("unknown");
        assert!(matches!(err, ProtocolError::UnknownActor(_)), "{err:#}");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let rt = Runtime::with_defaults();
        rt.spawn_worker("alice").expect("spawn");
        let err = rt.spawn_worker("alice").err().expect("duplicate");
        assert!(matches!(err, ProtocolError::DuplicateActor(_)), "{err:#}");
    }

    #[test]
    fn partitioned_actor_fails_delivery() {
        let rt = Runtime::with_defaults();
        let alice = ActorId::from("alice");
        let bob = ActorId::from("bob");
        rt.spawn_worker(alice.clone()).expect("spawn");
        rt.spawn_worker(bob.clone()).expect("spawn");
        rt.set_reachable(&bob, false);

        let err = rt
            .send_object(&alice, ObjectId(1), Payload::Int(3), &bob)
            .err()
            .expect("partitioned");
        assert!(matches!(err, ProtocolError::Delivery { .. }), "{err:#}");

        rt.set_reachable(&bob, true);
        rt.send_object(&alice, ObjectId(1), Payload::Int(3), &bob)
            .expect("healed");
    }

    #[test]
    fn oversized_messages_are_refused() {
        let rt = Runtime::new(RuntimeConfig {
            max_message_bytes: 16,
            ..RuntimeConfig::default()
        });
        let alice = ActorId::from("alice");
        rt.spawn_worker(alice.clone()).expect("spawn");
        let err = rt
            .send_object(&alice, ObjectId(1), Payload::Str("x".repeat(64)), &alice)
            .err()
            .expect("too large");
        assert!(err.to_string().contains("exceeds limit"), "{err:#}");
    }
}
