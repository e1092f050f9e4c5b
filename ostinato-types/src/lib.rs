//! # ostinato-types
//!
//! Shared type definitions for the ostinato looping core.
//! This crate contains the persisted configuration records (bindings, binding
//! sets) and the small identifier/enum types used by both the control thread
//! and the real-time thread in ostinato-core.

pub mod binding;
pub mod kernel;
pub mod symbol;
pub mod trigger;

pub use binding::{Binding, BindingConfig, BindingSelection, BindingSet};
pub use kernel::KernelEventType;
pub use symbol::{ActivationKind, Behavior, ResetScope, SymbolLevel};
pub use trigger::{TriggerKind, TriggerMode};

/// Zero-based index of a loop track.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct TrackId(u32);

impl TrackId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
    /// Track number as users see it (1-based).
    pub fn number(self) -> u32 {
        self.0 + 1
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0 + 1)
    }
}

/// Index of an interned symbol in the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Index of a compiled script in the script library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ScriptId(u32);

impl ScriptId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Handle to an event scheduled by the loop engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

impl EventId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Sequence number assigned to a kernel event when it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelEventId(u64);

impl KernelEventId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Unique identity of one running script invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterpreterId(u64);

impl InterpreterId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InterpreterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
