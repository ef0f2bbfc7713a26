//! Record-once, replay-many plans.
//!
//! A [`Plan`] is itself an actor. While its blueprint runs against traced
//! arguments, every instruction addressed to the plan is recorded instead of
//! executed. Afterwards the recorded template is replayed against concrete
//! argument/result ids, either at the owner (local) or, once the plan has been
//! relocated, by a single `execute_plan` command to the remote copy.
//!
//! State machine:
//! ```text
//! Empty ──build──▶ Built ──send──▶ Relocated
//!                    ▲                 │
//!                    └──────get────────┘
//! ```
//! `send` on an `Empty` plan only records the destination; relocation then
//! happens right after the first build.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::actor::Actor;
use crate::codec::Codec;
use crate::error::{ProtocolError, Result};
use crate::ids::{ActorId, ObjectId};
use crate::message::{Message, MessageKind, Payload};
use crate::pointer::{create_pointer, PointerOptions, RemoteReference};
use crate::rewrite::{rewrite_log, rewrite_message, Substitution};
use crate::runtime::Runtime;
use crate::trace::{PlanTrace, ReplayMode};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

pub const EXECUTE_PLAN: &str = "execute_plan";

/// User function traced once to produce the plan's log.
pub type Blueprint =
    Box<dyn Fn(&[RemoteReference]) -> Result<RemoteReference> + Send + Sync + 'static>;

/// One recorded message, kept both as received bytes and decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub raw: Vec<u8>,
    pub message: Message,
}

/// Wire form of a relocated plan.
///
/// `raw` holds the base64 framing of each `log` entry as the sender encoded
/// it. Rewriting a snapshot drops the framing; the receiver re-frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub id: ObjectId,
    pub name: String,
    pub owner: ActorId,
    pub log: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw: Vec<String>,
    pub argument_slots: Vec<ObjectId>,
    pub result_slots: Vec<ObjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Empty,
    Built,
    Relocated,
}

#[derive(Debug, Clone)]
struct Recording {
    /// Build-time log; never mutated after the build.
    template: Vec<LogEntry>,
    template_arguments: Vec<ObjectId>,
    template_results: Vec<ObjectId>,
    argument_slots: Vec<ObjectId>,
    result_slots: Vec<ObjectId>,
    last_replay: Vec<Message>,
}

impl Recording {
    fn new(template: Vec<LogEntry>, arguments: Vec<ObjectId>, results: Vec<ObjectId>) -> Self {
        Self {
            template,
            argument_slots: arguments.clone(),
            result_slots: results.clone(),
            template_arguments: arguments,
            template_results: results,
            last_replay: Vec::new(),
        }
    }

    fn messages(&self) -> Vec<Message> {
        self.template.iter().map(|e| e.message.clone()).collect()
    }
}

enum PlanState {
    Empty {
        destination: Option<ActorId>,
    },
    Built(Recording),
    Relocated {
        recording: Recording,
        location: ActorId,
        materialized: RemoteReference,
    },
}

#[derive(Default)]
struct Capture {
    entries: Vec<LogEntry>,
    /// Prefix already executed at the owner to answer value queries.
    forced: usize,
}

struct PlanInner {
    state: PlanState,
    /// Present only while the blueprint is being traced.
    capture: Option<Capture>,
    trace: PlanTrace,
}

pub struct Plan {
    id: ObjectId,
    actor_id: ActorId,
    name: String,
    owner: ActorId,
    context: Weak<Runtime>,
    blueprint: Option<Blueprint>,
    /// Serializes build, relocation and replay of this plan.
    execution: Mutex<()>,
    inner: Mutex<PlanInner>,
}

fn plan_actor_id(id: ObjectId) -> ActorId {
    ActorId::new(format!("plan-{id}"))
}

impl Plan {
    /// Create an empty plan owned by `owner` and register it as an actor, so
    /// traced references can address it.
    pub fn new<F>(
        runtime: &Arc<Runtime>,
        owner: &ActorId,
        name: impl Into<String>,
        blueprint: F,
    ) -> Result<Arc<Plan>>
    where
        F: Fn(&[RemoteReference]) -> Result<RemoteReference> + Send + Sync + 'static,
    {
        let owner = runtime.get_worker(owner)?.id().clone();
        let id = runtime.ids().next_id();
        let name = name.into();
        let plan = Arc::new(Plan {
            id,
            actor_id: plan_actor_id(id),
            owner,
            context: Arc::downgrade(runtime),
            blueprint: Some(Box::new(blueprint)),
            execution: Mutex::new(()),
            inner: Mutex::new(PlanInner {
                state: PlanState::Empty { destination: None },
                capture: None,
                trace: PlanTrace::new(id, name.clone()),
            }),
            name,
        });
        runtime.register_actor(plan.clone())?;
        debug!(plan = %id, owner = %plan.owner, "created plan");
        Ok(plan)
    }

    /// Rebuild a relocated plan at its new owner. The copy has no blueprint
    /// and starts out built.
    pub fn from_snapshot(
        runtime: &Arc<Runtime>,
        owner: &ActorId,
        snapshot: PlanSnapshot,
    ) -> Result<Plan> {
        let malformed = |index: usize, reason: String| ProtocolError::MalformedLog {
            plan: snapshot.id,
            index,
            reason,
        };
        if snapshot.result_slots.is_empty() {
            return Err(malformed(snapshot.log.len(), "no result slots".to_string()));
        }
        if !snapshot.raw.is_empty() && snapshot.raw.len() != snapshot.log.len() {
            return Err(malformed(
                snapshot.raw.len().min(snapshot.log.len()),
                format!(
                    "{} raw entries for {} decoded entries",
                    snapshot.raw.len(),
                    snapshot.log.len()
                ),
            ));
        }

        let codec = runtime.codec();
        let mut entries = Vec::with_capacity(snapshot.log.len());
        for (index, message) in snapshot.log.iter().enumerate() {
            let kind = message.kind();
            if !kind.is_instruction() || matches!(message, Message::MaterializePlan { .. }) {
                return Err(malformed(index, format!("unexpected {kind} entry")));
            }
            if let Some(framed) = snapshot.raw.get(index) {
                let bytes = B64
                    .decode(framed)
                    .map_err(|err| malformed(index, format!("invalid base64 framing: {err}")))?;
                let decoded = codec
                    .decode(&bytes)
                    .map_err(|err| malformed(index, err.to_string()))?;
                if &decoded != message {
                    return Err(malformed(
                        index,
                        "raw entry disagrees with decoded form".to_string(),
                    ));
                }
            }
            let raw = codec
                .encode(message)
                .map_err(|err| malformed(index, err.to_string()))?;
            entries.push(LogEntry {
                raw,
                message: message.clone(),
            });
        }

        let mut trace = PlanTrace::new(snapshot.id, snapshot.name.clone());
        trace.built(
            entries.len(),
            snapshot.argument_slots.len(),
            snapshot.result_slots.len(),
        );
        debug!(plan = %snapshot.id, owner = %owner, "materialized relocated plan");
        Ok(Plan {
            id: snapshot.id,
            actor_id: plan_actor_id(snapshot.id),
            name: snapshot.name,
            owner: owner.clone(),
            context: Arc::downgrade(runtime),
            blueprint: None,
            execution: Mutex::new(()),
            inner: Mutex::new(PlanInner {
                state: PlanState::Built(Recording::new(
                    entries,
                    snapshot.argument_slots,
                    snapshot.result_slots,
                )),
                capture: None,
                trace,
            }),
        })
    }

    pub fn object_id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &ActorId {
        &self.owner
    }

    fn inner(&self) -> MutexGuard<'_, PlanInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn serialize_execution(&self) -> MutexGuard<'_, ()> {
        self.execution.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> PlanStatus {
        match self.inner().state {
            PlanState::Empty { .. } => PlanStatus::Empty,
            PlanState::Built(_) => PlanStatus::Built,
            PlanState::Relocated { .. } => PlanStatus::Relocated,
        }
    }

    pub fn is_built(&self) -> bool {
        self.status() != PlanStatus::Empty
    }

    pub fn location(&self) -> Option<ActorId> {
        match &self.inner().state {
            PlanState::Relocated { location, .. } => Some(location.clone()),
            _ => None,
        }
    }

    pub fn materialized_reference(&self) -> Option<RemoteReference> {
        match &self.inner().state {
            PlanState::Relocated { materialized, .. } => Some(materialized.clone()),
            _ => None,
        }
    }

    fn with_recording<T>(&self, f: impl FnOnce(&Recording) -> T) -> Option<T> {
        match &self.inner().state {
            PlanState::Built(rec) | PlanState::Relocated { recording: rec, .. } => Some(f(rec)),
            PlanState::Empty { .. } => None,
        }
    }

    /// The recorded template log. Empty until the first build completes.
    pub fn log(&self) -> Vec<Message> {
        self.with_recording(Recording::messages).unwrap_or_default()
    }

    pub fn raw_log(&self) -> Vec<Vec<u8>> {
        self.with_recording(|rec| rec.template.iter().map(|e| e.raw.clone()).collect())
            .unwrap_or_default()
    }

    pub fn argument_slots(&self) -> Vec<ObjectId> {
        self.with_recording(|rec| rec.argument_slots.clone())
            .unwrap_or_default()
    }

    pub fn result_slots(&self) -> Vec<ObjectId> {
        self.with_recording(|rec| rec.result_slots.clone())
            .unwrap_or_default()
    }

    /// Messages delivered by the most recent local replay.
    pub fn last_replay(&self) -> Vec<Message> {
        self.with_recording(|rec| rec.last_replay.clone())
            .unwrap_or_default()
    }

    pub fn trace(&self) -> PlanTrace {
        self.inner().trace.clone()
    }

    /// SHA-256 over the framed template log, hex encoded.
    pub fn fingerprint(&self) -> Option<String> {
        self.with_recording(|rec| {
            let mut hasher = Sha256::new();
            for entry in &rec.template {
                hasher.update((entry.raw.len() as u64).to_be_bytes());
                hasher.update(&entry.raw);
            }
            hasher
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect()
        })
    }

    pub fn create_pointer(&self, opts: PointerOptions) -> Result<RemoteReference> {
        create_pointer(&self.runtime()?, self.id, &self.owner, opts)
    }

    /// Trace the blueprint if that has not happened yet. A second call is a
    /// no-op.
    pub fn build(&self, args: &[ObjectId]) -> Result<()> {
        let _serial = self.serialize_execution();
        if let Some(destination) = self.ensure_built(args)? {
            self.relocate(&destination)?;
        }
        Ok(())
    }

    /// Run the plan on the objects named by `args`, storing results under
    /// one fresh id.
    pub fn call(&self, args: &[RemoteReference]) -> Result<RemoteReference> {
        let result_id = self.runtime()?.ids().next_id();
        let ids: Vec<ObjectId> = args.iter().map(|a| a.id_at_location).collect();
        let mut results = self.execute_plan(&ids, &[result_id])?;
        results
            .pop()
            .ok_or_else(|| self.invalid("replay produced no result handle"))
    }

    /// Build on first use, relocate if a destination is pending, then replay
    /// with `args`/`result_ids` substituted for the recorded slots.
    pub fn execute_plan(
        &self,
        args: &[ObjectId],
        result_ids: &[ObjectId],
    ) -> Result<Vec<RemoteReference>> {
        let _serial = self.serialize_execution();
        if let Some(destination) = self.ensure_built(args)? {
            self.relocate(&destination)?;
        }

        let route = match &self.inner().state {
            PlanState::Built(_) => None,
            PlanState::Relocated {
                location,
                materialized,
                ..
            } => Some((location.clone(), materialized.clone())),
            PlanState::Empty { .. } => return Err(self.invalid("plan was not built")),
        };
        match route {
            None => self.replay_local(args, result_ids),
            Some((location, materialized)) => {
                self.replay_remote(args, result_ids, &location, &materialized)
            }
        }
    }

    /// Bind the plan to `location`. A built plan is shipped right away; an
    /// empty one is shipped after its first build.
    pub fn send(&self, location: &ActorId) -> Result<()> {
        let _serial = self.serialize_execution();
        self.runtime()?.get_worker(location)?;
        let ship_now = {
            let mut inner = self.inner();
            match &mut inner.state {
                PlanState::Empty {
                    destination: Some(current),
                }
                | PlanState::Relocated {
                    location: current, ..
                } => {
                    return Err(ProtocolError::DoubleRelocation {
                        plan: self.id,
                        location: current.clone(),
                    })
                }
                PlanState::Empty { destination } => {
                    *destination = Some(location.clone());
                    false
                }
                PlanState::Built(_) => true,
            }
        };
        if ship_now {
            self.relocate(location)?;
        }
        Ok(())
    }

    /// Return to purely local dispatch. The log is kept, so nothing is traced
    /// again; the remote copy is released on a best-effort basis.
    pub fn get(&self) {
        let _serial = self.serialize_execution();
        let released = {
            let mut inner = self.inner();
            let state = std::mem::replace(&mut inner.state, PlanState::Empty { destination: None });
            let (state, released) = match state {
                PlanState::Relocated {
                    recording,
                    materialized,
                    ..
                } => (PlanState::Built(recording), Some(materialized)),
                PlanState::Empty { .. } => (PlanState::Empty { destination: None }, None),
                built @ PlanState::Built(_) => (built, None),
            };
            inner.state = state;
            if released.is_some() {
                inner.trace.recalled();
            }
            released
        };
        if let Some(materialized) = released {
            let location = materialized.location.clone();
            if let Err(err) = materialized.release() {
                warn!(
                    plan = %self.id,
                    location = %location,
                    error = %err,
                    "failed to release remote plan copy"
                );
            }
        }
    }

    /// Returns the pending destination when this call performed the build.
    fn ensure_built(&self, args: &[ObjectId]) -> Result<Option<ActorId>> {
        let runtime = self.runtime()?;
        {
            let mut inner = self.inner();
            if !matches!(inner.state, PlanState::Empty { .. }) {
                return Ok(None);
            }
            inner.capture = Some(Capture::default());
        }

        let traced: Vec<RemoteReference> = args
            .iter()
            .map(|id| RemoteReference::traced(&runtime, &self.actor_id, *id, &self.owner))
            .collect();
        debug!(plan = %self.id, arguments = traced.len(), "tracing blueprint");
        let outcome = match &self.blueprint {
            Some(blueprint) => blueprint(&traced),
            None => Err(self.invalid("plan has no blueprint to build from")),
        };

        let mut inner = self.inner();
        let capture = inner.capture.take().unwrap_or_default();
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(plan = %self.id, error = %err, "blueprint failed; plan stays empty");
                return Err(err);
            }
        };

        let recording = Recording::new(capture.entries, args.to_vec(), vec![result.id_at_location]);
        inner
            .trace
            .built(recording.template.len(), args.len(), recording.template_results.len());
        info!(
            plan = %self.id,
            name = %self.name,
            messages = recording.template.len(),
            "built plan"
        );
        match std::mem::replace(&mut inner.state, PlanState::Built(recording)) {
            PlanState::Empty { destination } => Ok(destination),
            _ => Ok(None),
        }
    }

    fn relocate(&self, location: &ActorId) -> Result<()> {
        let runtime = self.runtime()?;
        runtime.get_worker(location)?;
        let snapshot = match &self.inner().state {
            PlanState::Built(rec) => self.snapshot_for(rec, location, runtime.codec())?,
            _ => return Err(self.invalid("only a built, local plan can be relocated")),
        };

        runtime.deliver(
            &self.owner,
            &Message::MaterializePlan {
                id: self.id,
                snapshot: Box::new(snapshot),
            },
            location,
        )?;
        let materialized = self.create_pointer(PointerOptions {
            location: Some(location.clone()),
            ..PointerOptions::default()
        })?;

        let mut inner = self.inner();
        let state = std::mem::replace(&mut inner.state, PlanState::Empty { destination: None });
        inner.state = match state {
            PlanState::Built(recording) => PlanState::Relocated {
                recording,
                location: location.clone(),
                materialized,
            },
            other => other,
        };
        inner.trace.relocated(location);
        info!(plan = %self.id, location = %location, "relocated plan");
        Ok(())
    }

    /// Once relocated, recorded messages must address the actor that runs
    /// the copy instead of the tracing placeholder.
    fn snapshot_for(
        &self,
        rec: &Recording,
        location: &ActorId,
        codec: &dyn Codec,
    ) -> Result<PlanSnapshot> {
        let sub = Substitution::new().with_actor(self.actor_id.clone(), location.clone());
        let log = rewrite_log(&rec.messages(), &sub);
        let raw = log
            .iter()
            .map(|m| codec.encode(m).map(|bytes| B64.encode(bytes)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PlanSnapshot {
            id: self.id,
            name: self.name.clone(),
            owner: self.owner.clone(),
            log,
            raw,
            argument_slots: rec.template_arguments.clone(),
            result_slots: rec.template_results.clone(),
        })
    }

    /// Template slots to call-time ids, applied in one pass, plus the plan's
    /// own address to `target`.
    fn replay_substitution(
        &self,
        rec: &Recording,
        args: &[ObjectId],
        result_ids: &[ObjectId],
        target: &ActorId,
    ) -> Substitution {
        Substitution::new()
            .with_ids(&rec.template_arguments, args)
            .with_ids(&rec.template_results, result_ids)
            .with_actor(self.actor_id.clone(), target.clone())
    }

    fn check_arity(
        &self,
        rec: &Recording,
        args: &[ObjectId],
        result_ids: &[ObjectId],
    ) -> Result<()> {
        if args.len() != rec.template_arguments.len() {
            return Err(self.invalid(format!(
                "expected {} argument(s), got {}",
                rec.template_arguments.len(),
                args.len()
            )));
        }
        if result_ids.len() != rec.template_results.len() {
            return Err(self.invalid(format!(
                "expected {} result id(s), got {}",
                rec.template_results.len(),
                result_ids.len()
            )));
        }
        Ok(())
    }

    fn replay_local(
        &self,
        args: &[ObjectId],
        result_ids: &[ObjectId],
    ) -> Result<Vec<RemoteReference>> {
        let runtime = self.runtime()?;
        let messages = {
            let mut inner = self.inner();
            let PlanInner { state, trace, .. } = &mut *inner;
            let PlanState::Built(rec) = state else {
                return Err(self.invalid("local replay needs a built, local plan"));
            };
            self.check_arity(rec, args, result_ids)?;
            let sub = self.replay_substitution(rec, args, result_ids, &self.owner);
            let messages = rewrite_log(&rec.messages(), &sub);
            rec.argument_slots = args.to_vec();
            rec.result_slots = result_ids.to_vec();
            rec.last_replay = messages.clone();
            trace.replay_started(ReplayMode::Local, &self.owner, messages.len());
            messages
        };

        debug!(
            plan = %self.id,
            owner = %self.owner,
            messages = messages.len(),
            "replaying locally"
        );
        for (index, message) in messages.iter().enumerate() {
            if let Err(err) = runtime.deliver(&self.actor_id, message, &self.owner) {
                self.inner().trace.replay_finished(false);
                return Err(self.replay_error(index, err));
            }
            self.inner().trace.message_delivered(index, message.kind());
        }
        self.inner().trace.replay_finished(true);

        Ok(result_ids
            .iter()
            .map(|id| RemoteReference::result_at(&runtime, &self.owner, *id, &self.owner))
            .collect())
    }

    fn replay_remote(
        &self,
        args: &[ObjectId],
        result_ids: &[ObjectId],
        location: &ActorId,
        materialized: &RemoteReference,
    ) -> Result<Vec<RemoteReference>> {
        {
            let mut inner = self.inner();
            let PlanInner { state, trace, .. } = &mut *inner;
            if let PlanState::Relocated { recording, .. } = state {
                self.check_arity(recording, args, result_ids)?;
                recording.argument_slots = args.to_vec();
                recording.result_slots = result_ids.to_vec();
            }
            trace.replay_started(ReplayMode::Remote, location, 1);
        }

        debug!(plan = %self.id, location = %location, "requesting remote execution");
        let outcome = materialized.call_with_ids(
            EXECUTE_PLAN,
            vec![Payload::ids(args)],
            result_ids.to_vec(),
        );
        let mut inner = self.inner();
        match outcome {
            Ok(results) => {
                inner.trace.message_delivered(0, MessageKind::Command);
                inner.trace.replay_finished(true);
                Ok(results)
            }
            Err(err) => {
                inner.trace.replay_finished(false);
                drop(inner);
                Err(self.replay_error(0, err))
            }
        }
    }

    fn receive_entry(&self, raw: Vec<u8>, message: Message) -> Result<Payload> {
        let kind = message.kind();
        if kind.requires_value() {
            return self.force_execution(message);
        }
        if !kind.is_instruction() {
            debug!(plan = %self.id, "ignoring data message while recording");
            return Ok(Payload::None);
        }

        let limit = self.runtime()?.config().max_plan_log_entries;
        let mut inner = self.inner();
        let Some(capture) = inner.capture.as_mut() else {
            return Err(self.invalid(format!("received {kind} while not recording")));
        };
        if capture.entries.len() >= limit {
            return Err(ProtocolError::LogOverflow {
                plan: self.id,
                limit,
            });
        }
        debug!(plan = %self.id, kind = %kind, index = capture.entries.len(), "recorded message");
        capture.entries.push(LogEntry { raw, message });
        Ok(Payload::None)
    }

    /// A traced caller needs a real value. While tracing, execute the
    /// recorded prefix where the arguments live: the pending destination, or
    /// the owner. After the build, run the whole plan with the slots of the
    /// last replay. Then forward the query.
    fn force_execution(&self, query: Message) -> Result<Payload> {
        let runtime = self.runtime()?;
        let pending = {
            let mut inner = self.inner();
            let PlanInner {
                state,
                capture,
                trace,
            } = &mut *inner;
            // Arguments of a plan bound for another actor already live there.
            let target = match state {
                PlanState::Empty {
                    destination: Some(destination),
                } => destination.clone(),
                _ => self.owner.clone(),
            };
            capture.as_mut().map(|c| {
                let start = c.forced;
                let pending: Vec<Message> =
                    c.entries[start..].iter().map(|e| e.message.clone()).collect();
                c.forced = c.entries.len();
                trace.forced_execution(query.kind(), pending.len());
                (start, pending, target)
            })
        };

        if let Some((start, pending, target)) = pending {
            warn!(
                plan = %self.id,
                query = %query.kind(),
                pending = pending.len(),
                target = %target,
                "value needed while tracing; executing recorded prefix"
            );
            let sub = Substitution::new().with_actor(self.actor_id.clone(), target.clone());
            for (offset, message) in pending.iter().enumerate() {
                runtime
                    .deliver(&self.actor_id, &rewrite_message(message, &sub), &target)
                    .map_err(|err| self.replay_error(start + offset, err))?;
            }
            return runtime.deliver(&self.actor_id, &rewrite_message(&query, &sub), &target);
        }

        let (args, results) = self
            .with_recording(|rec| (rec.argument_slots.clone(), rec.result_slots.clone()))
            .ok_or_else(|| self.invalid(format!("{} received before build", query.kind())))?;
        self.inner().trace.forced_execution(query.kind(), 0);
        self.execute_plan(&args, &results)?;

        let target = self.location().unwrap_or_else(|| self.owner.clone());
        let sub = self
            .with_recording(|rec| self.replay_substitution(rec, &args, &results, &target))
            .unwrap_or_default();
        runtime.deliver(&self.actor_id, &rewrite_message(&query, &sub), &target)
    }

    fn invalid(&self, message: impl Into<String>) -> ProtocolError {
        ProtocolError::InvalidState {
            plan: self.id,
            message: message.into(),
        }
    }

    fn replay_error(&self, index: usize, err: ProtocolError) -> ProtocolError {
        ProtocolError::Replay {
            plan: self.id,
            owner: self.owner.clone(),
            location: self
                .location()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string()),
            index,
            source: Box::new(err),
        }
    }
}

impl Actor for Plan {
    fn id(&self) -> &ActorId {
        &self.actor_id
    }

    fn runtime(&self) -> Result<Arc<Runtime>> {
        self.context
            .upgrade()
            .ok_or_else(|| ProtocolError::Detached(self.actor_id.clone()))
    }

    fn receive(&self, message: Message) -> Result<Payload> {
        let raw = self.runtime()?.codec().encode(&message)?;
        self.receive_entry(raw, message)
    }

    fn receive_bytes(&self, codec: &dyn Codec, bytes: &[u8]) -> Result<Vec<u8>> {
        let message = codec.decode(bytes)?;
        let response = self.receive_entry(bytes.to_vec(), message)?;
        codec.encode_response(&response)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Plan {} id:{} owner:{}", self.name, self.id, self.owner)?;
        if let Some(location) = self.location() {
            write!(f, " location:{location}")?;
        }
        if self.is_built() {
            f.write_str(" built")?;
        }
        f.write_str(">")
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn increment_plan() -> (Arc<Runtime>, Arc<Plan>) {
        let rt = Runtime::with_defaults();
        rt.spawn_worker("alice").expect("spawn");
        let plan = Plan::new(&rt, &ActorId::from("alice"), "inc", |args| {
            args[0].call("add", vec![Payload::Int(1)])
        })
        .expect("plan");
        (rt, plan)
    }

    #[test]
    fn display_reflects_state() {
        let (_rt, plan) = increment_plan();
        let id = plan.object_id();
        assert_eq!(plan.to_string(), format!("<Plan inc id:{id} owner:alice>"));

        plan.build(&[ObjectId(1000)]).expect("build");
        assert_eq!(plan.to_string(), format!("<Plan inc id:{id} owner:alice built>"));
    }

    #[test]
    fn fingerprint_is_stable_across_rebuild_attempts() {
        let (_rt, plan) = increment_plan();
        assert!(plan.fingerprint().is_none());
        plan.build(&[ObjectId(1000)]).expect("build");
        let first = plan.fingerprint().expect("fingerprint");
        plan.build(&[ObjectId(2000)]).expect("second build is a no-op");
        assert_eq!(plan.fingerprint().expect("fingerprint"), first);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn recorded_entries_keep_received_bytes() {
        let (rt, plan) = increment_plan();
        plan.build(&[ObjectId(1000)]).expect("build");
        let raw = plan.raw_log();
        assert_eq!(raw.len(), 1);
        let decoded = rt.codec().decode(&raw[0]).expect("decode");
        assert_eq!(decoded, plan.log()[0]);
    }

    #[test]
    fn instructions_outside_a_build_are_rejected() {
        let (_rt, plan) = increment_plan();
        let err = plan
            .receive(Message::DeleteObject { id: ObjectId(1) })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidState { .. }), "{err:#}");
    }

    #[test]
    fn snapshot_requires_result_slots() {
        let rt = Runtime::with_defaults();
        rt.spawn_worker("bob").expect("spawn");
        let snapshot = PlanSnapshot {
            id: ObjectId(9),
            name: "empty".into(),
            owner: ActorId::from("alice"),
            log: Vec::new(),
            raw: Vec::new(),
            argument_slots: vec![ObjectId(1)],
            result_slots: Vec::new(),
        };
        let err = Plan::from_snapshot(&rt, &ActorId::from("bob"), snapshot).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedLog { .. }), "{err:#}");
    }
}
