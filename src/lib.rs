//! `planwire`: deferred, replayable remote execution over an actor network.
//!
//! A user function is traced once against placeholder references. Every
//! message it would send is recorded by a [`plan::Plan`] acting as a
//! recording actor; the recorded log is then replayed with fresh ids, either
//! at the plan's owner or at a remote location the plan was shipped to.
//!
//! Invariants:
//! - identifier rewriting is pure and applies all substitutions at once
//! - a plan is local or relocated to exactly one location, never both
//! - replays always rewrite the immutable build-time log
//! - all state lives in an explicit [`runtime::Runtime`], never in globals

pub mod actor;
pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod location;
pub mod message;
pub mod plan;
pub mod pointer;
pub mod rewrite;
pub mod runtime;
pub mod trace;

pub use error::{ProtocolError, Result};
pub use ids::{ActorId, ObjectId};
pub use message::{Message, MessageKind, Payload};
pub use plan::Plan;
pub use pointer::RemoteReference;
pub use runtime::Runtime;
