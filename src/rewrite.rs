//! Identifier substitution over nested messages.
//!
//! Rewrites are pure: the input is never mutated, every call returns a fresh
//! structure of the same shape with sequence order preserved. All id pairs of
//! one [`Substitution`] are applied simultaneously, so a mapping such as
//! `{1 -> 2, 2 -> 1}` swaps instead of collapsing both ids onto one.

use std::collections::BTreeMap;

use crate::ids::{ActorId, ObjectId};
use crate::message::{Command, Message, Payload, PointerRef};
use crate::plan::PlanSnapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    ids: BTreeMap<ObjectId, ObjectId>,
    actor: Option<(ActorId, ActorId)>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// One id pair plus one actor pair.
    pub fn single(
        change_id: ObjectId,
        to_id: ObjectId,
        from_actor: ActorId,
        to_actor: ActorId,
    ) -> Self {
        Self::new()
            .with_id(change_id, to_id)
            .with_actor(from_actor, to_actor)
    }

    pub fn with_id(mut self, from: ObjectId, to: ObjectId) -> Self {
        if from != to {
            self.ids.insert(from, to);
        }
        self
    }

    /// Pairs `from[i]` with `to[i]`. Callers check arity first.
    pub fn with_ids(mut self, from: &[ObjectId], to: &[ObjectId]) -> Self {
        for (f, t) in from.iter().zip(to) {
            self = self.with_id(*f, *t);
        }
        self
    }

    pub fn with_actor(mut self, from: ActorId, to: ActorId) -> Self {
        self.actor = if from == to { None } else { Some((from, to)) };
        self
    }

    pub fn is_identity(&self) -> bool {
        self.ids.is_empty() && self.actor.is_none()
    }

    /// The same substitution run backwards.
    pub fn inverted(&self) -> Self {
        Self {
            ids: self.ids.iter().map(|(f, t)| (*t, *f)).collect(),
            actor: self.actor.as_ref().map(|(f, t)| (t.clone(), f.clone())),
        }
    }

    fn id(&self, id: ObjectId) -> ObjectId {
        self.ids.get(&id).copied().unwrap_or(id)
    }

    fn actor(&self, actor: &ActorId) -> ActorId {
        match &self.actor {
            Some((from, to)) if from == actor => to.clone(),
            _ => actor.clone(),
        }
    }

    fn pointer(&self, ptr: &PointerRef) -> PointerRef {
        PointerRef {
            location: self.actor(&ptr.location),
            id_at_location: self.id(ptr.id_at_location),
        }
    }

    fn ids_vec(&self, ids: &[ObjectId]) -> Vec<ObjectId> {
        ids.iter().map(|id| self.id(*id)).collect()
    }
}

pub fn rewrite_payload(payload: &Payload, sub: &Substitution) -> Payload {
    match payload {
        Payload::Id(id) => Payload::Id(sub.id(*id)),
        Payload::Actor(actor) => Payload::Actor(sub.actor(actor)),
        Payload::Pointer(ptr) => Payload::Pointer(sub.pointer(ptr)),
        Payload::Seq(items) => Payload::Seq(
            items
                .iter()
                .map(|item| rewrite_payload(item, sub))
                .collect(),
        ),
        // Strings are never searched: "42" is not the identifier 42.
        Payload::None
        | Payload::Bool(_)
        | Payload::Int(_)
        | Payload::Float(_)
        | Payload::Str(_) => payload.clone(),
    }
}

pub fn rewrite_message(message: &Message, sub: &Substitution) -> Message {
    match message {
        Message::Object { id, value } => Message::Object {
            id: sub.id(*id),
            value: rewrite_payload(value, sub),
        },
        Message::ObjectRequest { id } => Message::ObjectRequest { id: sub.id(*id) },
        Message::IsNoneQuery { id } => Message::IsNoneQuery { id: sub.id(*id) },
        Message::ShapeQuery { id } => Message::ShapeQuery { id: sub.id(*id) },
        Message::DeleteObject { id } => Message::DeleteObject { id: sub.id(*id) },
        Message::Command(cmd) => Message::Command(Command {
            operation: cmd.operation.clone(),
            target: sub.pointer(&cmd.target),
            args: cmd
                .args
                .iter()
                .map(|arg| rewrite_payload(arg, sub))
                .collect(),
            return_ids: sub.ids_vec(&cmd.return_ids),
        }),
        Message::Redistribute { inner } => Message::Redistribute {
            inner: Box::new(rewrite_message(inner, sub)),
        },
        Message::MaterializePlan { id, snapshot } => Message::MaterializePlan {
            id: sub.id(*id),
            snapshot: Box::new(rewrite_snapshot(snapshot, sub)),
        },
    }
}

pub fn rewrite_log(log: &[Message], sub: &Substitution) -> Vec<Message> {
    log.iter().map(|msg| rewrite_message(msg, sub)).collect()
}

fn rewrite_snapshot(snapshot: &PlanSnapshot, sub: &Substitution) -> PlanSnapshot {
    PlanSnapshot {
        id: sub.id(snapshot.id),
        name: snapshot.name.clone(),
        owner: sub.actor(&snapshot.owner),
        log: rewrite_log(&snapshot.log, sub),
        raw: Vec::new(),
        argument_slots: sub.ids_vec(&snapshot.argument_slots),
        result_slots: sub.ids_vec(&snapshot.result_slots),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(location: &str, id: u64) -> PointerRef {
        PointerRef {
            location: ActorId::from(location),
            id_at_location: ObjectId(id),
        }
    }

    fn corpus() -> Vec<Message> {
        vec![
            Message::Object {
                id: ObjectId(5),
                value: Payload::Seq(vec![Payload::Int(5), Payload::Str("5".into())]),
            },
            Message::command(
                "add",
                ptr("plan-1", 5),
                vec![
                    Payload::Pointer(ptr("alice", 5)),
                    Payload::Seq(vec![
                        Payload::Id(ObjectId(5)),
                        Payload::Seq(vec![Payload::Actor(ActorId::from("plan-1"))]),
                        Payload::Float(2.5),
                    ]),
                ],
                vec![ObjectId(6), ObjectId(5)],
            ),
            Message::ShapeQuery { id: ObjectId(6) },
            Message::Redistribute {
                inner: Box::new(Message::DeleteObject { id: ObjectId(5) }),
            },
        ]
    }

    #[test]
    fn rewrite_replaces_ids_and_actors_everywhere() {
        let sub = Substitution::single(
            ObjectId(5),
            ObjectId(42),
            ActorId::from("plan-1"),
            ActorId::from("alice"),
        );
        let out = rewrite_log(&corpus(), &sub);

        let cmd = out[1].as_command().expect("command");
        assert_eq!(cmd.target, ptr("alice", 42));
        assert_eq!(cmd.args[0], Payload::Pointer(ptr("alice", 42)));
        assert_eq!(
            cmd.args[1],
            Payload::Seq(vec![
                Payload::Id(ObjectId(42)),
                Payload::Seq(vec![Payload::Actor(ActorId::from("alice"))]),
                Payload::Float(2.5),
            ])
        );
        assert_eq!(cmd.return_ids, vec![ObjectId(6), ObjectId(42)]);
    }

    #[test]
    fn rewrite_ignores_plain_scalars_and_strings() {
        let sub = Substitution::new().with_id(ObjectId(5), ObjectId(42));
        let out = rewrite_message(&corpus()[0], &sub);
        assert_eq!(
            out,
            Message::Object {
                id: ObjectId(42),
                value: Payload::Seq(vec![Payload::Int(5), Payload::Str("5".into())]),
            }
        );
    }

    #[test]
    fn rewrite_is_invertible_when_target_ids_are_fresh() {
        let sub = Substitution::single(
            ObjectId(5),
            ObjectId(900),
            ActorId::from("plan-1"),
            ActorId::from("carol"),
        );
        let log = corpus();
        let there = rewrite_log(&log, &sub);
        assert_ne!(there, log);
        let back = rewrite_log(&there, &sub.inverted());
        assert_eq!(back, log);
    }

    #[test]
    fn rewrite_does_not_touch_the_input() {
        let log = corpus();
        let before = log.clone();
        let _ = rewrite_log(&log, &Substitution::new().with_id(ObjectId(6), ObjectId(7)));
        assert_eq!(log, before);
    }

    #[test]
    fn simultaneous_substitution_swaps_ids() {
        let msg = Message::command(
            "sub",
            ptr("alice", 1),
            vec![Payload::Pointer(ptr("alice", 2))],
            vec![ObjectId(3)],
        );
        let sub = Substitution::new().with_ids(
            &[ObjectId(1), ObjectId(2)],
            &[ObjectId(2), ObjectId(1)],
        );
        let out = rewrite_message(&msg, &sub);
        let cmd = out.as_command().expect("command");
        assert_eq!(cmd.target.id_at_location, ObjectId(2));
        assert_eq!(cmd.args[0], Payload::Pointer(ptr("alice", 1)));
    }

    #[test]
    fn identity_pairs_are_dropped() {
        let sub = Substitution::new()
            .with_id(ObjectId(1), ObjectId(1))
            .with_actor(ActorId::from("a"), ActorId::from("a"));
        assert!(sub.is_identity());
    }
}
