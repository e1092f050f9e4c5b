//! Resolved actions.
//!
//! An [`Action`] is built once per binding by the compiler and reused every
//! time its trigger fires. The binderator calls [`Action::reset_transient`]
//! before each reuse; anything that outlives one dispatch (fan-out to a second
//! track, forwarding to the control thread) works on a clone.

use std::sync::{Arc, LazyLock};

use ostinato_types::{
    ActivationKind, EventId, InterpreterId, KernelEventId, ResetScope, ScriptId, SymbolId,
    SymbolLevel, TrackId, TriggerKind,
};

/// Longest argument string an action carries, in bytes.
pub const MAX_ACTION_ARGS: usize = 128;

static NO_ARGS: LazyLock<Arc<str>> = LazyLock::new(|| Arc::from(""));

/// Where an action is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// The active track, or focus-locked tracks for focus-lockable targets.
    #[default]
    Active,
    Track(TrackId),
    Group(Arc<str>),
}

impl Scope {
    /// Parse a configuration scope string.
    ///
    /// Empty means the active track, digits are a 1-based track number and
    /// anything else names a group. Track "0" is treated as the active track.
    pub fn parse(s: &str) -> Scope {
        let s = s.trim();
        if s.is_empty() {
            return Scope::Active;
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return match s.parse::<u32>() {
                Ok(n) if n > 0 => Scope::Track(TrackId::new(n - 1)),
                _ => Scope::Active,
            };
        }
        Scope::Group(Arc::from(s))
    }
}

/// Snapshot of a resolved function symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionTarget {
    pub sustainable: bool,
    pub focus_lockable: bool,
    pub reset: Option<ResetScope>,
}

/// Snapshot of a resolved parameter symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterTarget {
    pub global: bool,
    pub focus_lockable: bool,
}

/// Snapshot of a resolved script symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptTarget {
    pub id: ScriptId,
    pub continuous: bool,
    pub sustainable: bool,
    pub focus_lockable: bool,
}

/// What an action does, resolved once when the binding is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// The symbol had no definition when the binding was compiled.
    #[default]
    Unresolved,
    Function(FunctionTarget),
    Parameter(ParameterTarget),
    Script(ScriptTarget),
    Sample,
    Activation(ActivationKind),
}

impl Target {
    /// Controller values between 1 and the threshold are ignored; 0 releases.
    pub fn wants_threshold_gating(&self) -> bool {
        matches!(self, Target::Function(_))
    }

    /// Every controller value is forwarded as the action value.
    pub fn wants_continuous_passthrough(&self) -> bool {
        match self {
            Target::Parameter(_) => true,
            Target::Script(s) => s.continuous,
            _ => false,
        }
    }

    /// Only a controller value of 127 fires the action.
    pub fn is_select_only(&self) -> bool {
        !self.wants_threshold_gating() && !self.wants_continuous_passthrough()
    }

    pub fn is_focus_lockable(&self) -> bool {
        match self {
            Target::Function(f) => f.focus_lockable,
            Target::Parameter(p) => p.focus_lockable,
            Target::Script(s) => s.focus_lockable,
            _ => false,
        }
    }

    pub fn is_sustainable(&self) -> bool {
        match self {
            Target::Function(f) => f.sustainable,
            Target::Script(s) => s.sustainable,
            _ => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Target::Unresolved)
    }

    pub fn reset_scope(&self) -> Option<ResetScope> {
        match self {
            Target::Function(f) => f.reset,
            _ => None,
        }
    }
}

/// A resolved, reusable execution unit.
#[derive(Debug, Clone)]
pub struct Action {
    pub symbol: SymbolId,
    pub name: Arc<str>,
    pub target: Target,
    pub level: SymbolLevel,
    pub value: i32,
    template_value: i32,
    pub scope: Scope,
    /// Binding argument string, truncated to [`MAX_ACTION_ARGS`]. Shared
    /// between clones.
    pub args: Arc<str>,

    pub trigger: TriggerKind,
    /// Correlates down and up transitions of the same physical trigger.
    /// Zero when the trigger has no usable identity.
    pub trigger_id: u32,
    /// Raw value of the firing event (velocity, controller value).
    pub trigger_value: i32,
    /// Frame offset of the event within the current block.
    pub trigger_offset: i32,

    pub sustain: bool,
    pub sustain_end: bool,
    pub sustain_id: u32,

    pub no_quantize: bool,
    pub no_latency: bool,
    pub no_sync: bool,

    /// Caller correlation id; a finished script reports it back.
    pub request_id: u32,
    /// Script that issued this action, if any.
    pub interpreter: Option<InterpreterId>,
    /// Destination chosen by fan-out. None for global invocations.
    pub track: Option<TrackId>,
    /// Engine event scheduled for this action.
    pub event: Option<EventId>,
    /// Kernel event sent for this action.
    pub kernel_event: Option<KernelEventId>,
}

impl Action {
    pub fn new(symbol: SymbolId, name: impl Into<Arc<str>>, target: Target) -> Self {
        Self {
            symbol,
            name: name.into(),
            target,
            level: SymbolLevel::Core,
            value: 0,
            template_value: 0,
            scope: Scope::Active,
            args: Arc::clone(&NO_ARGS),
            trigger: TriggerKind::Host,
            trigger_id: 0,
            trigger_value: 0,
            trigger_offset: 0,
            sustain: false,
            sustain_end: false,
            sustain_id: 0,
            no_quantize: false,
            no_latency: false,
            no_sync: false,
            request_id: 0,
            interpreter: None,
            track: None,
            event: None,
            kernel_event: None,
        }
    }

    /// Set the value and remember it as the template value.
    pub fn with_value(mut self, value: i32) -> Self {
        self.value = value;
        self.template_value = value;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerKind) -> Self {
        self.trigger = trigger;
        self
    }

    /// Set the argument string, truncating at a char boundary.
    pub fn set_args(&mut self, args: &str) {
        self.args = if args.is_empty() {
            Arc::clone(&NO_ARGS)
        } else {
            Arc::from(truncate(args, MAX_ACTION_ARGS))
        };
    }

    pub fn template_value(&self) -> i32 {
        self.template_value
    }

    /// Clear everything a previous dispatch left behind.
    pub fn reset_transient(&mut self) {
        self.sustain_end = false;
        self.event = None;
        self.kernel_event = None;
        self.interpreter = None;
        self.track = None;
        self.trigger_offset = 0;
        self.trigger_value = 0;
        self.value = self.template_value;
    }

    /// The id used to match up transitions, clicks and reentry.
    pub fn correlation_id(&self) -> u32 {
        if self.sustain_id != 0 {
            self.sustain_id
        } else {
            self.trigger_id
        }
    }
}

/// Truncate to at most `max` bytes without splitting a char.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
