use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, warn};

use crate::codec::Codec;
use crate::error::{ProtocolError, Result};
use crate::ids::{ActorId, ObjectId};
use crate::message::{Command, Message, Payload};
use crate::plan::{Plan, EXECUTE_PLAN};
use crate::pointer::{create_pointer, PointerOptions, RemoteReference};
use crate::runtime::Runtime;

/// The one capability set every participant shares. Call sites only ever go
/// through `send`/`receive`; whether the receiver executes or records is
/// decided by the implementation chosen at construction.
pub trait Actor: Send + Sync {
    fn id(&self) -> &ActorId;

    fn runtime(&self) -> Result<Arc<Runtime>>;

    fn receive(&self, message: Message) -> Result<Payload>;

    fn receive_bytes(&self, codec: &dyn Codec, bytes: &[u8]) -> Result<Vec<u8>> {
        let message = codec.decode(bytes)?;
        let response = self.receive(message)?;
        codec.encode_response(&response)
    }

    fn send(&self, message: &Message, destination: &ActorId) -> Result<Payload> {
        self.runtime()?.deliver(self.id(), message, destination)
    }
}

#[derive(Clone)]
enum StoredObject {
    Value(Payload),
    Plan(Arc<Plan>),
}

/// Executing actor: materializes objects, answers queries and runs commands.
pub struct Worker {
    id: ActorId,
    context: Weak<Runtime>,
    objects: Mutex<BTreeMap<ObjectId, StoredObject>>,
    /// Official membership when this worker owns a group.
    members: RwLock<BTreeSet<ActorId>>,
}

impl Worker {
    pub(crate) fn new(id: ActorId, context: Weak<Runtime>) -> Self {
        Self {
            id,
            context,
            objects: Mutex::new(BTreeMap::new()),
            members: RwLock::new(BTreeSet::new()),
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<ObjectId, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_obj(&self, id: ObjectId, value: Payload) {
        self.objects().insert(id, StoredObject::Value(value));
    }

    /// Store `value` under a fresh id and return a handle owned by this worker.
    pub fn put(&self, value: Payload) -> Result<RemoteReference> {
        let runtime = self.runtime()?;
        let id = runtime.ids().next_id();
        self.register_obj(id, value);
        create_pointer(&runtime, id, &self.id, PointerOptions::default())
    }

    pub fn object(&self, id: ObjectId) -> Option<Payload> {
        match self.objects().get(&id) {
            Some(StoredObject::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn plan(&self, id: ObjectId) -> Option<Arc<Plan>> {
        match self.objects().get(&id) {
            Some(StoredObject::Plan(p)) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects().contains_key(&id)
    }

    pub fn object_count(&self) -> usize {
        self.objects().len()
    }

    pub fn create_pointer(&self, id: ObjectId, opts: PointerOptions) -> Result<RemoteReference> {
        create_pointer(&self.runtime()?, id, &self.id, opts)
    }

    pub fn admit_member(&self, member: ActorId) {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member);
    }

    pub fn remove_member(&self, member: &ActorId) {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(member);
    }

    pub fn official_members(&self) -> BTreeSet<ActorId> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn value(&self, id: ObjectId) -> Result<Payload> {
        match self.objects().get(&id) {
            Some(StoredObject::Value(v)) => Ok(v.clone()),
            Some(StoredObject::Plan(_)) => Err(ProtocolError::execution(
                &self.id,
                format!("object {id} is a plan, not a value"),
            )),
            None => Err(ProtocolError::UnknownObject {
                actor: self.id.clone(),
                object: id,
            }),
        }
    }

    fn operand(&self, arg: &Payload) -> Result<Payload> {
        match arg {
            Payload::Pointer(ptr) if ptr.location == self.id => self.value(ptr.id_at_location),
            Payload::Pointer(ptr) => Err(ProtocolError::execution(
                &self.id,
                format!(
                    "operand {} lives at '{}', not here",
                    ptr.id_at_location, ptr.location
                ),
            )),
            other => Ok(other.clone()),
        }
    }

    fn run_command(&self, cmd: Command) -> Result<Payload> {
        if cmd.target.location != self.id {
            return Err(ProtocolError::execution(
                &self.id,
                format!(
                    "command '{}' addressed to '{}'",
                    cmd.operation, cmd.target.location
                ),
            ));
        }
        if cmd.operation == EXECUTE_PLAN {
            return self.run_stored_plan(&cmd);
        }

        let [result_id] = cmd.return_ids[..] else {
            return Err(ProtocolError::execution(
                &self.id,
                format!(
                    "'{}' needs exactly one return id, got {}",
                    cmd.operation,
                    cmd.return_ids.len()
                ),
            ));
        };
        let target = self.value(cmd.target.id_at_location)?;
        let args = cmd
            .args
            .iter()
            .map(|a| self.operand(a))
            .collect::<Result<Vec<_>>>()?;
        let out = apply(&cmd.operation, &target, &args)
            .map_err(|msg| ProtocolError::execution(&self.id, msg))?;
        self.register_obj(result_id, out);
        Ok(Payload::None)
    }

    fn run_stored_plan(&self, cmd: &Command) -> Result<Payload> {
        let plan = self.plan(cmd.target.id_at_location).ok_or_else(|| {
            ProtocolError::UnknownObject {
                actor: self.id.clone(),
                object: cmd.target.id_at_location,
            }
        })?;
        let args = cmd
            .args
            .first()
            .and_then(Payload::as_seq)
            .unwrap_or_default()
            .iter()
            .map(|a| match a {
                Payload::Id(id) => Ok(*id),
                Payload::Pointer(ptr) if ptr.location == self.id => Ok(ptr.id_at_location),
                other => Err(ProtocolError::execution(
                    &self.id,
                    format!("execute_plan argument must be an id, got {other:?}"),
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        let results = plan.execute_plan(&args, &cmd.return_ids)?;
        Ok(Payload::Seq(
            results
                .iter()
                .map(|r| Payload::Id(r.id_at_location))
                .collect(),
        ))
    }

    /// Apply `inner` here, then try every official member. Failed members
    /// do not stop the fan-out; they are named in the returned error.
    fn redistribute(&self, inner: Message) -> Result<Payload> {
        let runtime = self.runtime()?;
        self.receive(inner.clone())?;
        let mut delivered = 1;
        let mut failed = Vec::new();
        for member in self.official_members() {
            if member == self.id {
                continue;
            }
            match runtime.deliver(&self.id, &inner, &member) {
                Ok(_) => delivered += 1,
                Err(err) => {
                    warn!(
                        owner = %self.id,
                        member = %member,
                        error = %err,
                        "redistribution failed"
                    );
                    failed.push(format!("{member} ({err})"));
                }
            }
        }
        if !failed.is_empty() {
            return Err(ProtocolError::execution(
                &self.id,
                format!(
                    "redistribution reached {delivered} actor(s); failed: {}",
                    failed.join(", ")
                ),
            ));
        }
        Ok(Payload::Int(delivered))
    }
}

impl Actor for Worker {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn runtime(&self) -> Result<Arc<Runtime>> {
        self.context
            .upgrade()
            .ok_or_else(|| ProtocolError::Detached(self.id.clone()))
    }

    fn receive(&self, message: Message) -> Result<Payload> {
        debug!(actor = %self.id, kind = %message.kind(), "receive");
        match message {
            Message::Object { id, value } => {
                self.register_obj(id, value);
                Ok(Payload::None)
            }
            Message::ObjectRequest { id } => self.value(id),
            Message::IsNoneQuery { id } => Ok(Payload::Bool(self.value(id)?.is_none())),
            Message::ShapeQuery { id } => Ok(Payload::Seq(
                shape(&self.value(id)?)
                    .into_iter()
                    .map(|d| Payload::Int(d as i64))
                    .collect(),
            )),
            Message::DeleteObject { id } => Ok(Payload::Bool(self.objects().remove(&id).is_some())),
            Message::Command(cmd) => self.run_command(cmd),
            Message::Redistribute { inner } => self.redistribute(*inner),
            Message::MaterializePlan { id, snapshot } => {
                let plan = Plan::from_snapshot(&self.runtime()?, &self.id, *snapshot)?;
                self.objects().insert(id, StoredObject::Plan(Arc::new(plan)));
                Ok(Payload::Id(id))
            }
        }
    }
}

fn shape(value: &Payload) -> Vec<usize> {
    match value {
        Payload::Seq(items) => {
            let mut dims = vec![items.len()];
            if let Some(first) = items.first() {
                dims.extend(shape(first));
            }
            dims
        }
        _ => Vec::new(),
    }
}

fn apply(
    operation: &str,
    target: &Payload,
    args: &[Payload],
) -> std::result::Result<Payload, String> {
    match (operation, args) {
        ("neg", []) => map_numeric(target, &|v| match v {
            Num::Int(i) => i.checked_neg().map(Num::Int).ok_or("integer overflow"),
            Num::Float(f) => Ok(Num::Float(-f)),
        }),
        ("add" | "sub" | "mul", [rhs]) => broadcast(operation, target, rhs),
        (op @ ("add" | "sub" | "mul" | "neg"), _) => {
            Err(format!("'{op}' called with {} argument(s)", args.len()))
        }
        (op, _) => Err(format!("unknown operation '{op}'")),
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn num(p: &Payload) -> Option<Num> {
    match p {
        Payload::Int(i) => Some(Num::Int(*i)),
        Payload::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn from_num(n: Num) -> Payload {
    match n {
        Num::Int(i) => Payload::Int(i),
        Num::Float(f) => Payload::Float(f),
    }
}

fn map_numeric(
    value: &Payload,
    f: &dyn Fn(Num) -> std::result::Result<Num, &'static str>,
) -> std::result::Result<Payload, String> {
    match value {
        Payload::Seq(items) => items
            .iter()
            .map(|item| map_numeric(item, f))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Payload::Seq),
        other => {
            let n = num(other).ok_or_else(|| format!("non-numeric operand {other:?}"))?;
            f(n).map(from_num).map_err(str::to_string)
        }
    }
}

/// Elementwise arithmetic; a scalar on either side is broadcast.
fn broadcast(op: &str, lhs: &Payload, rhs: &Payload) -> std::result::Result<Payload, String> {
    match (lhs, rhs) {
        (Payload::Seq(a), Payload::Seq(b)) => {
            if a.len() != b.len() {
                return Err(format!("length mismatch {} vs {}", a.len(), b.len()));
            }
            a.iter()
                .zip(b)
                .map(|(x, y)| broadcast(op, x, y))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Payload::Seq)
        }
        (Payload::Seq(a), scalar) => a
            .iter()
            .map(|x| broadcast(op, x, scalar))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Payload::Seq),
        (scalar, Payload::Seq(b)) => b
            .iter()
            .map(|y| broadcast(op, scalar, y))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Payload::Seq),
        (x, y) => {
            let (a, b) = match (num(x), num(y)) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(format!("non-numeric operands {x:?}, {y:?}")),
            };
            scalar_op(op, a, b).map(from_num)
        }
    }
}

fn scalar_op(op: &str, a: Num, b: Num) -> std::result::Result<Num, String> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => {
            let out = match op {
                "add" => x.checked_add(y),
                "sub" => x.checked_sub(y),
                _ => x.checked_mul(y),
            };
            out.map(Num::Int)
                .ok_or_else(|| format!("integer overflow in '{op}'"))
        }
        _ => {
            let (x, y) = (as_f64(a), as_f64(b));
            Ok(Num::Float(match op {
                "add" => x + y,
                "sub" => x - y,
                _ => x * y,
            }))
        }
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}
