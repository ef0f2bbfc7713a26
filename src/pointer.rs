use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::ids::{ActorId, ObjectId};
use crate::message::{Command, Message, Payload, PointerRef};
use crate::runtime::Runtime;

/// Handle naming an object by `(location, id_at_location)`.
///
/// The handle never blocks: invoking an operation returns result handles
/// immediately and only a consumer asking for the value waits on a response.
#[derive(Clone)]
pub struct RemoteReference {
    /// The handle's own id, distinct from the object it names.
    pub id: ObjectId,
    pub location: ActorId,
    pub id_at_location: ObjectId,
    /// Actor holding this handle; commands are sent on its behalf.
    pub owner: ActorId,
    /// Delete the remote object when the handle is released.
    pub garbage_collect_data: bool,
    context: Weak<Runtime>,
}

/// Optional overrides for [`create_pointer`]. Unset fields default to the
/// referenced object's owner and id.
#[derive(Debug, Clone, Default)]
pub struct PointerOptions {
    pub location: Option<ActorId>,
    pub id_at_location: Option<ObjectId>,
    pub owner: Option<ActorId>,
    pub ptr_id: Option<ObjectId>,
    pub garbage_collect_data: Option<bool>,
}

/// Build a handle to `object_id`, held by `object_owner`.
///
/// Both `owner` and `location` must resolve through the runtime registry.
/// When the handle points at a different actor it reuses the object's id;
/// otherwise it gets a fresh id so it cannot shadow the object itself.
/// Every call allocates a new handle, existing handles are never reused.
pub fn create_pointer(
    runtime: &Arc<Runtime>,
    object_id: ObjectId,
    object_owner: &ActorId,
    opts: PointerOptions,
) -> Result<RemoteReference> {
    let owner = opts.owner.unwrap_or_else(|| object_owner.clone());
    let location = opts.location.unwrap_or_else(|| object_owner.clone());
    let owner = runtime.get_worker(&owner)?.id().clone();
    let location = runtime.get_worker(&location)?.id().clone();

    let id_at_location = opts.id_at_location.unwrap_or(object_id);
    let id = opts.ptr_id.unwrap_or_else(|| {
        if &location != object_owner {
            object_id
        } else {
            runtime.ids().next_id()
        }
    });

    Ok(RemoteReference {
        id,
        location,
        id_at_location,
        owner,
        garbage_collect_data: opts.garbage_collect_data.unwrap_or(true),
        context: Arc::downgrade(runtime),
    })
}

impl RemoteReference {
    /// Handle to a result slot the caller pre-allocated at `location`.
    pub(crate) fn result_at(
        runtime: &Arc<Runtime>,
        location: &ActorId,
        id_at_location: ObjectId,
        owner: &ActorId,
    ) -> Self {
        Self {
            id: runtime.ids().next_id(),
            location: location.clone(),
            id_at_location,
            owner: owner.clone(),
            garbage_collect_data: true,
            context: Arc::downgrade(runtime),
        }
    }

    /// Placeholder handle used while tracing: it outlives the trace pass, so
    /// it never deletes anything.
    pub(crate) fn traced(
        runtime: &Arc<Runtime>,
        recorder: &ActorId,
        id_at_location: ObjectId,
        owner: &ActorId,
    ) -> Self {
        Self {
            garbage_collect_data: false,
            ..Self::result_at(runtime, recorder, id_at_location, owner)
        }
    }

    pub fn address(&self) -> PointerRef {
        PointerRef {
            location: self.location.clone(),
            id_at_location: self.id_at_location,
        }
    }

    pub fn to_payload(&self) -> Payload {
        Payload::Pointer(self.address())
    }

    pub fn with_garbage_collect_data(mut self, enabled: bool) -> Self {
        self.garbage_collect_data = enabled;
        self
    }

    fn runtime(&self) -> Result<Arc<Runtime>> {
        self.context
            .upgrade()
            .ok_or_else(|| ProtocolError::Detached(self.owner.clone()))
    }

    /// Run `operation` on the referenced object with one fresh result slot.
    pub fn call(&self, operation: &str, args: Vec<Payload>) -> Result<RemoteReference> {
        let response_id = self.runtime()?.ids().next_id();
        let mut out = self.call_with_ids(operation, args, vec![response_id])?;
        out.pop().ok_or_else(|| {
            ProtocolError::execution(&self.location, "command produced no result handle")
        })
    }

    /// Package `(operation, self, args)` as a command for `location`; the
    /// results land under `response_ids` there.
    pub fn call_with_ids(
        &self,
        operation: &str,
        args: Vec<Payload>,
        response_ids: Vec<ObjectId>,
    ) -> Result<Vec<RemoteReference>> {
        let runtime = self.runtime()?;
        let command = Command {
            operation: operation.to_string(),
            target: self.address(),
            args,
            return_ids: response_ids,
        };
        runtime.send_command(&self.owner, command, &self.location)
    }

    /// Fetch the referenced value. Blocks only the caller.
    pub fn get(&self) -> Result<Payload> {
        self.query(Message::ObjectRequest {
            id: self.id_at_location,
        })
    }

    pub fn is_none(&self) -> Result<bool> {
        match self.query(Message::IsNoneQuery {
            id: self.id_at_location,
        })? {
            Payload::Bool(b) => Ok(b),
            other => Err(ProtocolError::execution(
                &self.location,
                format!("is-none query answered with {other:?}"),
            )),
        }
    }

    pub fn shape(&self) -> Result<Vec<usize>> {
        let response = self.query(Message::ShapeQuery {
            id: self.id_at_location,
        })?;
        dims_from(&self.location, &response)
    }

    /// Drop the handle, deleting the remote object if this handle owns it.
    pub fn release(self) -> Result<()> {
        if !self.garbage_collect_data {
            return Ok(());
        }
        debug!(location = %self.location, object = %self.id_at_location, "releasing remote object");
        self.query(Message::DeleteObject {
            id: self.id_at_location,
        })
        .map(|_| ())
    }

    fn query(&self, message: Message) -> Result<Payload> {
        self.runtime()?.deliver(&self.owner, &message, &self.location)
    }
}

fn dims_from(location: &ActorId, response: &Payload) -> Result<Vec<usize>> {
    let Payload::Seq(dims) = response else {
        return Err(ProtocolError::execution(
            location,
            format!("shape query answered with {response:?}"),
        ));
    };
    dims.iter()
        .map(|d| match d {
            Payload::Int(n) if *n >= 0 => Ok(*n as usize),
            other => Err(ProtocolError::execution(
                location,
                format!("shape query answered with {other:?}"),
            )),
        })
        .collect()
}

impl PartialEq for RemoteReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.location == other.location
            && self.id_at_location == other.id_at_location
            && self.owner == other.owner
            && self.garbage_collect_data == other.garbage_collect_data
    }
}

impl fmt::Debug for RemoteReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteReference")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("id_at_location", &self.id_at_location)
            .field("owner", &self.owner)
            .field("garbage_collect_data", &self.garbage_collect_data)
            .finish()
    }
}

impl fmt::Display for RemoteReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Pointer id:{} {}:{} owner:{}>",
            self.id, self.location, self.id_at_location, self.owner
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;

    fn runtime_with(actors: &[&str]) -> Arc<Runtime> {
        let rt = Runtime::with_defaults();
        for a in actors {
            rt.spawn_worker(*a).expect("spawn");
        }
        rt
    }

    #[test]
    fn pointer_to_another_actor_reuses_object_id() {
        let rt = runtime_with(&["alice", "bob"]);
        let ptr = create_pointer(
            &rt,
            ObjectId(77),
            &ActorId::from("alice"),
            PointerOptions {
                location: Some(ActorId::from("bob")),
                ..PointerOptions::default()
            },
        )
        .expect("pointer");
        assert_eq!(ptr.id, ObjectId(77));
        assert_eq!(ptr.id_at_location, ObjectId(77));
        assert_eq!(ptr.location, ActorId::from("bob"));
        assert_eq!(ptr.owner, ActorId::from("alice"));
        assert!(ptr.garbage_collect_data);
    }

    #[test]
    fn pointer_at_home_gets_a_fresh_id() {
        let rt = runtime_with(&["alice"]);
        let a = create_pointer(&rt, ObjectId(500), &ActorId::from("alice"), Default::default())
            .expect("pointer");
        let b = create_pointer(&rt, ObjectId(500), &ActorId::from("alice"), Default::default())
            .expect("pointer");
        assert_ne!(a.id, ObjectId(500));
        assert_ne!(a.id, b.id, "every call allocates a fresh handle");
        assert_eq!(a.id_at_location, ObjectId(500));
    }

    #[test]
    fn create_pointer_rejects_unknown_actors() {
        let rt = runtime_with(&["alice"]);
        let err = create_pointer(
            &rt,
            ObjectId(1),
            &ActorId::from("alice"),
            PointerOptions {
                location: Some(ActorId::from("ghost")),
                ..PointerOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownActor(_)), "{err:#}");
    }

    #[test]
    fn call_runs_operation_at_location() {
        let rt = runtime_with(&["alice", "bob"]);
        let bob = rt.get_worker(&ActorId::from("bob")).expect("bob");
        let x = rt
            .send_object(&ActorId::from("alice"), ObjectId(900), Payload::Int(4), bob.id())
            .expect("send");

        let y = x.call("add", vec![Payload::Int(1)]).expect("call");
        assert_eq!(y.location, ActorId::from("bob"));
        assert_eq!(y.get().expect("get"), Payload::Int(5));
        assert!(!y.is_none().expect("is_none"));
        assert_eq!(y.shape().expect("shape"), Vec::<usize>::new());
    }

    #[test]
    fn call_to_unreachable_location_surfaces_delivery_error() {
        let rt = runtime_with(&["alice", "bob"]);
        let x = rt
            .send_object(
                &ActorId::from("alice"),
                ObjectId(900),
                Payload::Int(4),
                &ActorId::from("bob"),
            )
            .expect("send");
        rt.set_reachable(&ActorId::from("bob"), false);
        let err = x.call("add", vec![Payload::Int(1)]).unwrap_err();
        assert!(matches!(err, ProtocolError::Delivery { .. }), "{err:#}");
    }

    #[test]
    fn release_deletes_only_when_collecting() {
        let rt = runtime_with(&["alice", "bob"]);
        let alice = ActorId::from("alice");
        let bob = ActorId::from("bob");
        let kept = rt
            .send_object(&alice, ObjectId(1), Payload::Int(1), &bob)
            .expect("send")
            .with_garbage_collect_data(false);
        kept.clone().release().expect("release");
        assert_eq!(kept.get().expect("still there"), Payload::Int(1));

        let owned = kept.with_garbage_collect_data(true);
        owned.clone().release().expect("release");
        let err = owned.get().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownObject { .. }), "{err:#}");
    }

    #[test]
    fn shape_answers_must_be_sequences_of_dims() {
        let at = ActorId::from("bob");
        let answer = Payload::Seq(vec![Payload::Int(2), Payload::Int(3)]);
        assert_eq!(dims_from(&at, &answer).expect("dims"), vec![2, 3]);
        let err = dims_from(&at, &Payload::Int(4)).unwrap_err();
        assert!(matches!(err, ProtocolError::Execution { .. }), "{err:#}");
        let err = dims_from(&at, &Payload::Seq(vec![Payload::Int(-1)])).unwrap_err();
        assert!(matches!(err, ProtocolError::Execution { .. }), "{err:#}");
    }
}
