#![allow(dead_code)]
//! Test harness utilities for ostinato-core integration tests.

use ostinato_core::action::Action;
use ostinato_core::config::Config;
use ostinato_core::kernel::{KernelEvent, KernelHandler};
use ostinato_core::symbol::{FunctionDefinition, SymbolTable};
use ostinato_core::{ControlHandle, Engine, LoopCore};
use ostinato_types::{
    BindingConfig, BindingSet, EventId, InterpreterId, KernelEventType, ResetScope, TrackId,
};

/// One call into the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub track: Option<TrackId>,
    pub name: String,
    pub value: i32,
    pub sustain_end: bool,
}

/// Engine that records invocations and otherwise does nothing.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    pub tracks: u32,
    pub active: TrackId,
    pub calls: Vec<Call>,
    pub finished: Vec<InterpreterId>,
}

impl RecordingEngine {
    pub fn new(tracks: u32) -> Self {
        Self {
            tracks,
            ..Default::default()
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.name.as_str()).collect()
    }
}

impl Engine for RecordingEngine {
    fn track_count(&self) -> u32 {
        self.tracks
    }

    fn active_track(&self) -> TrackId {
        self.active
    }

    fn track_group(&self, _track: TrackId) -> Option<u32> {
        None
    }

    fn is_focus_locked(&self, _track: TrackId) -> bool {
        false
    }

    fn invoke(&mut self, track: Option<TrackId>, action: &Action) -> Option<EventId> {
        self.calls.push(Call {
            track,
            name: action.name.to_string(),
            value: action.value,
            sustain_end: action.sustain_end,
        });
        None
    }

    fn get_parameter(&self, _track: Option<TrackId>, _name: &str) -> Option<i32> {
        None
    }

    fn set_parameter(&mut self, _track: Option<TrackId>, _name: &str, _value: i32) {}

    fn schedule_wait(&mut self, _track: TrackId, _msec: u32) -> Option<EventId> {
        None
    }

    fn script_finished(&mut self, interpreter: InterpreterId) {
        self.finished.push(interpreter);
    }
}

/// Kernel handler that remembers what it saw.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub events: Vec<(KernelEventType, String, u32)>,
}

impl KernelHandler for RecordingHandler {
    fn handle(&mut self, event: &mut KernelEvent) {
        self.events
            .push((event.kind, event.arg(0).to_string(), event.request_id));
    }
}

/// The functions every test registers.
pub fn symbols() -> SymbolTable {
    let mut symbols = SymbolTable::new();
    symbols.register_function("Record", FunctionDefinition::sustainable());
    symbols.register_function("Mute", FunctionDefinition::default());
    symbols.register_function("TrackReset", FunctionDefinition::reset(ResetScope::Track));
    symbols
}

/// A control/core pair with one binding set installed and published.
pub fn pair(set: BindingSet, engine: &mut RecordingEngine) -> (ControlHandle, LoopCore) {
    let (mut control, mut core) = ostinato_core::new(&Config::default(), symbols());
    control.set_bindings(BindingConfig { sets: vec![set] });
    core.process_block(256, 44_100, engine);
    (control, core)
}
