//! # ostinato-core
//!
//! Trigger binding and script runtime for a live looper. Turns keyboard,
//! MIDI and host triggers into actions on loop tracks, and runs the small
//! scripting language used to build compound behaviors. Nothing on the audio
//! thread blocks. Binding tables, interpreters and kernel events are built
//! or pooled on the control thread; dispatching a binding and running plain
//! script statements does not allocate. Script text with `$` references,
//! script variables, `Call` arguments and interpreters beyond
//! `scripts.max_active` do.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ostinato_core::config::{self, Config};
//! use ostinato_core::kernel::LogKernelHandler;
//! use ostinato_core::symbol::{FunctionDefinition, SymbolTable};
//!
//! // 1. Register what the engine implements before compiling bindings
//! let mut symbols = SymbolTable::new();
//! symbols.register_function("Record", FunctionDefinition::sustainable());
//!
//! // 2. Split into the control half and the real-time half
//! let config = Config::load();
//! let (mut control, mut core) = ostinato_core::new(&config, symbols);
//! control.set_bindings(config::load_bindings());
//!
//! // 3. Audio thread, every block:
//! // core.handle_midi_event(&event, &mut engine);
//! // core.process_block(frames, sample_rate, &mut engine);
//!
//! // 4. Control thread, periodically:
//! control.process_kernel_events(&mut LogKernelHandler);
//! ```
//!
//! ## Module Overview
//!
//! - [`binding`]: qualifier codec, binding tables, compiler and the
//!   `Binderator` that looks triggers up
//! - [`action`]: `Action`, `Target` capabilities and `Scope`
//! - [`dispatch`]: `do_action()` and track fan-out
//! - [`script`]: script parser, interpreter and runtime
//! - [`kernel`]: pooled events from the real-time thread to the control thread
//! - [`handle`]: `ControlHandle` / `LoopCore` pair and table publication
//! - [`config`]: TOML configuration (embedded defaults + user override)
//! - [`midi`]: MIDI input via midir

pub mod action;
pub mod binding;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod handle;
pub mod kernel;
pub mod logging;
pub mod midi;
pub mod script;
pub mod symbol;

pub use action::{Action, Scope, Target};
pub use engine::Engine;
pub use handle::{new, ControlHandle, LoopCore, TableUpdate};
pub use symbol::SymbolTable;

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use ostinato_types::{EventId, InterpreterId, TrackId};

    use crate::action::Action;
    use crate::engine::Engine;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Invocation {
        pub track: Option<TrackId>,
        pub name: String,
        pub value: i32,
        pub args: String,
        pub sustain_end: bool,
        pub trigger_value: i32,
        pub interpreter: Option<InterpreterId>,
    }

    /// Records everything the dispatch layer asks of the engine.
    #[derive(Debug, Default)]
    pub struct FakeEngine {
        pub tracks: u32,
        pub active: TrackId,
        pub groups: Vec<Option<u32>>,
        pub focus_locked: Vec<bool>,
        pub params: HashMap<String, i32>,
        pub invocations: Vec<Invocation>,
        /// When set, `schedule_wait` hands out events.
        pub schedule_events: bool,
        pub last_scheduled: Option<EventId>,
        pub finished: Vec<InterpreterId>,
        next_event: u64,
    }

    impl FakeEngine {
        pub fn new(tracks: u32) -> Self {
            Self {
                tracks,
                active: TrackId::new(0),
                groups: vec![None; tracks as usize],
                focus_locked: vec![false; tracks as usize],
                ..Default::default()
            }
        }
    }

    impl Engine for FakeEngine {
        fn track_count(&self) -> u32 {
            self.tracks
        }

        fn active_track(&self) -> TrackId {
            self.active
        }

        fn track_group(&self, track: TrackId) -> Option<u32> {
            self.groups.get(track.get() as usize).copied().flatten()
        }

        fn is_focus_locked(&self, track: TrackId) -> bool {
            self.focus_locked.get(track.get() as usize).copied().unwrap_or(false)
        }

        fn invoke(&mut self, track: Option<TrackId>, action: &Action) -> Option<EventId> {
            self.invocations.push(Invocation {
                track,
                name: action.name.to_string(),
                value: action.value,
                args: action.args.to_string(),
                sustain_end: action.sustain_end,
                trigger_value: action.trigger_value,
                interpreter: action.interpreter,
            });
            None
        }

        fn get_parameter(&self, _track: Option<TrackId>, name: &str) -> Option<i32> {
            self.params.get(name).copied()
        }

        fn set_parameter(&mut self, _track: Option<TrackId>, name: &str, value: i32) {
            self.params.insert(name.to_string(), value);
        }

        fn schedule_wait(&mut self, _track: TrackId, _msec: u32) -> Option<EventId> {
            if !self.schedule_events {
                return None;
            }
            self.next_event += 1;
            let event = EventId::new(self.next_event);
            self.last_scheduled = Some(event);
            Some(event)
        }

        fn script_finished(&mut self, interpreter: InterpreterId) {
            self.finished.push(interpreter);
        }
    }
}
