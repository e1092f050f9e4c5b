//! Persisted binding declarations.
//!
//! A [`Binding`] connects one trigger (a key, a MIDI note, a controller...) to
//! a target symbol by name. Bindings are grouped into named [`BindingSet`]s; a
//! [`BindingSelection`] decides which sets are compiled into the live tables.

use serde::{Deserialize, Serialize};

use crate::trigger::{TriggerKind, TriggerMode};

fn default_value() -> i32 {
    -1
}

/// One trigger-to-symbol declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub trigger: TriggerKind,
    /// Key qualifier or MIDI number. -1 when unset.
    #[serde(default = "default_value")]
    pub value: i32,
    /// Key notation ("Ctrl+r"). Takes precedence over `value` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// MIDI channel: 0 = any, 1..=16 = specific.
    #[serde(default)]
    pub channel: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TriggerMode>,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub args: String,
    /// Empty = active track, digits = track number, anything else = group name.
    #[serde(default)]
    pub scope: String,
}

impl Binding {
    pub fn new(trigger: TriggerKind, value: i32, symbol: impl Into<String>) -> Self {
        Self {
            trigger,
            value,
            key: None,
            channel: 0,
            mode: None,
            symbol: symbol.into(),
            args: String::new(),
            scope: String::new(),
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_mode(mut self, mode: TriggerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

/// A named, ordered list of bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSet {
    pub name: String,
    /// Overlay sets augment the base set instead of replacing it.
    #[serde(default)]
    pub overlay: bool,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl BindingSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overlay: false,
            bindings: Vec::new(),
        }
    }

    pub fn overlay(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overlay: true,
            bindings: Vec::new(),
        }
    }

    pub fn push(&mut self, binding: Binding) {
        self.bindings.push(binding);
    }
}

/// The full binding configuration as loaded from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    #[serde(default)]
    pub sets: Vec<BindingSet>,
}

impl BindingConfig {
    /// Merge a user configuration: sets with a matching name replace the
    /// default set, new sets are appended.
    pub fn merge(&mut self, user: BindingConfig) {
        for set in user.sets {
            match self.sets.iter_mut().find(|s| s.name == set.name) {
                Some(existing) => *existing = set,
                None => self.sets.push(set),
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&BindingSet> {
        self.sets.iter().find(|s| s.name == name)
    }
}

/// Which binding sets are live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSelection {
    /// Non-overlay set replacing the base (first) set. None = first set.
    #[serde(default)]
    pub active: Option<String>,
    /// Overlay sets merged after the base, in order.
    #[serde(default)]
    pub overlays: Vec<String>,
}

impl BindingSelection {
    /// Resolve the selection against the configured sets, in compile order.
    /// The base comes first so it wins every qualifier collision.
    pub fn resolve<'a>(&self, sets: &'a [BindingSet]) -> Vec<&'a BindingSet> {
        let mut out = Vec::new();
        let base = self
            .active
            .as_deref()
            .and_then(|name| sets.iter().find(|s| s.name == name && !s.overlay))
            .or_else(|| sets.iter().find(|s| !s.overlay));
        if let Some(base) = base {
            out.push(base);
        }
        for name in &self.overlays {
            if let Some(set) = sets.iter().find(|s| &s.name == name && s.overlay) {
                if !out.iter().any(|s| s.name == set.name) {
                    out.push(set);
                }
            }
        }
        out
    }

    /// Apply an activation request for the named set.
    /// Overlay sets toggle into the overlay list, other sets replace the base.
    /// Returns false if no set has that name.
    pub fn activate(&mut self, name: &str, sets: &[BindingSet]) -> bool {
        let Some(set) = sets.iter().find(|s| s.name == name) else {
            return false;
        };
        if set.overlay {
            if let Some(pos) = self.overlays.iter().position(|n| n == name) {
                self.overlays.remove(pos);
            } else {
                self.overlays.push(name.to_string());
            }
        } else {
            self.active = Some(name.to_string());
        }
        true
    }
}
