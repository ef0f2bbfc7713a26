//! Named delivery targets and groups of them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::ids::ActorId;
use crate::message::{Message, Payload};
use crate::runtime::Runtime;

/// Anything a message can be addressed to.
pub trait Destination {
    /// Actors that physically receive a send to this destination.
    fn delivery_targets(&self) -> Vec<ActorId>;

    fn send(&self, runtime: &Runtime, sender: &ActorId, message: &Message) -> Result<Vec<Payload>> {
        self.delivery_targets()
            .iter()
            .map(|target| runtime.deliver(sender, message, target))
            .collect()
    }
}

/// A single actor that can be addressed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location(ActorId);

impl Location {
    /// Resolve `id` through the runtime registry.
    pub fn resolve(runtime: &Runtime, id: &ActorId) -> Result<Self> {
        runtime.get_worker(id)?;
        Ok(Self(id.clone()))
    }

    pub fn id(&self) -> &ActorId {
        &self.0
    }
}

impl From<ActorId> for Location {
    fn from(id: ActorId) -> Self {
        Self(id)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Destination for Location {
    fn delivery_targets(&self) -> Vec<ActorId> {
        vec![self.0.clone()]
    }
}

/// Locally believed membership. The set may be stale; it is only ever used
/// to reason about who a message would reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationGroup {
    pub name: String,
    pub known_group_members: BTreeSet<Location>,
}

impl LocationGroup {
    pub fn new(name: impl Into<String>, members: impl IntoIterator<Item = Location>) -> Self {
        Self {
            name: name.into(),
            known_group_members: members.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.known_group_members.iter().any(|m| m.id() == id)
    }

    /// How many actors a send is believed to reach.
    pub fn would_reach(&self) -> usize {
        self.known_group_members.len()
    }

    pub fn believe_joined(&mut self, member: Location) -> bool {
        self.known_group_members.insert(member)
    }

    pub fn believe_left(&mut self, member: &Location) -> bool {
        self.known_group_members.remove(member)
    }
}

impl Destination for LocationGroup {
    fn delivery_targets(&self) -> Vec<ActorId> {
        self.known_group_members
            .iter()
            .map(|m| m.id().clone())
            .collect()
    }
}

/// Group whose delivery always goes through `group_owner`, which fans out to
/// the official membership it keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryBackedLocationGroup {
    group: LocationGroup,
    group_owner: Location,
}

impl RegistryBackedLocationGroup {
    /// The owner must be a registered actor. It is always counted as a
    /// known member.
    pub fn new(
        runtime: &Runtime,
        name: impl Into<String>,
        group_owner: &ActorId,
        members: impl IntoIterator<Item = Location>,
    ) -> Result<Self> {
        let group_owner = Location::resolve(runtime, group_owner)?;
        let mut group = LocationGroup::new(name, members);
        group.believe_joined(group_owner.clone());
        Ok(Self { group, group_owner })
    }

    pub fn group_owner(&self) -> &Location {
        &self.group_owner
    }

    pub fn name(&self) -> &str {
        &self.group.name
    }

    pub fn known_group_members(&self) -> &BTreeSet<Location> {
        &self.group.known_group_members
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.group.contains(id)
    }

    pub fn would_reach(&self) -> usize {
        self.group.would_reach()
    }

    pub fn believe_joined(&mut self, member: Location) -> bool {
        self.group.believe_joined(member)
    }

    /// The owner cannot be believed away.
    pub fn believe_left(&mut self, member: &Location) -> bool {
        member != &self.group_owner && self.group.believe_left(member)
    }
}

impl Destination for RegistryBackedLocationGroup {
    fn delivery_targets(&self) -> Vec<ActorId> {
        vec![self.group_owner.id().clone()]
    }

    fn send(&self, runtime: &Runtime, sender: &ActorId, message: &Message) -> Result<Vec<Payload>> {
        debug!(
            group = %self.group.name,
            owner = %self.group_owner,
            believed = self.would_reach(),
            "routing group message through owner"
        );
        let wrapped = Message::Redistribute {
            inner: Box::new(message.clone()),
        };
        Ok(vec![runtime.deliver(sender, &wrapped, self.group_owner.id())?])
    }
}
