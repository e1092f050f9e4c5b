//! Symbol behavior tags.

use serde::{Deserialize, Serialize};

/// What kind of thing a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Behavior {
    Function,
    Parameter,
    Script,
    Sample,
    Activation,
}

/// Where a symbol is implemented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolLevel {
    /// Implemented by the loop engine on the real-time thread.
    #[default]
    Core,
    /// Implemented by the UI layer; actions are forwarded to the control thread.
    Ui,
}

/// The configuration object an activation symbol selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationKind {
    Preset,
    Setup,
    Bindings,
}

/// How much of the engine a function resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetScope {
    Track,
    Global,
}
