//! The control / real-time handle pair.
//!
//! [`ControlHandle`] lives on the control thread. It owns the symbol table,
//! the binding configuration and the script library, compiles binding tables
//! off to the side and publishes them as [`TableUpdate`]s. [`LoopCore`] lives
//! on the real-time thread: it installs updates at block boundaries,
//! dispatches key and MIDI events through the tables and runs scripts.
//! Replaced tables travel back so they are dropped on the control thread.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use ostinato_types::{
    BindingConfig, BindingSelection, EventId, KernelEventType, ScriptId, SymbolId, TrackId,
};

use crate::action::Action;
use crate::binding::{compile_keyboard, compile_midi, Binderator, BindingTable, MidiTables};
use crate::config::Config;
use crate::dispatch::{do_action, DispatchEnv, ScriptHost};
use crate::engine::Engine;
use crate::kernel::{self, KernelEvent, KernelHandler, KernelPort, KernelService};
use crate::midi::{parse_midi_message, MidiEvent};
use crate::script::{parse_script, ScriptError, ScriptLibrary, ScriptRuntime};
use crate::symbol::SymbolTable;

/// Pending table updates; more than this and the real-time side is not
/// keeping up.
const UPDATE_CAPACITY: usize = 8;
const UI_ACTION_CAPACITY: usize = 256;

/// Replacement state for the real-time side. `None` fields are left alone.
/// The same type carries the replaced state back.
#[derive(Debug, Default)]
pub struct TableUpdate {
    pub keyboard: Option<BindingTable>,
    pub midi: Option<MidiTables>,
    pub scripts: Option<Arc<ScriptLibrary>>,
    pub controller_threshold: Option<u8>,
}

impl TableUpdate {
    fn is_empty(&self) -> bool {
        self.keyboard.is_none()
            && self.midi.is_none()
            && self.scripts.is_none()
            && self.controller_threshold.is_none()
    }
}

/// Create both halves.
pub fn new(config: &Config, symbols: SymbolTable) -> (ControlHandle, LoopCore) {
    let (updates_tx, updates_rx) = crossbeam_channel::bounded(UPDATE_CAPACITY);
    let (retired_tx, retired_rx) = crossbeam_channel::bounded(UPDATE_CAPACITY);
    let (ui_tx, ui_rx) = crossbeam_channel::bounded(UI_ACTION_CAPACITY);
    let (service, port) = kernel::channel(&config.kernel);
    let library = Arc::new(ScriptLibrary::new());

    let control = ControlHandle {
        symbols,
        bindings: BindingConfig::default(),
        selection: BindingSelection::default(),
        library: ScriptLibrary::new(),
        controller_threshold: config.controller_threshold,
        kernel: service,
        updates: updates_tx,
        retired: retired_rx,
        ui_actions: ui_rx,
    };
    let core = LoopCore {
        binderator: Binderator::new(config.controller_threshold),
        runtime: ScriptRuntime::new(config.scripts.clone(), library),
        kernel: port,
        ui: ui_tx,
        updates: updates_rx,
        retired: retired_tx,
    };
    (control, core)
}

/// Control-thread half.
pub struct ControlHandle {
    symbols: SymbolTable,
    bindings: BindingConfig,
    selection: BindingSelection,
    library: ScriptLibrary,
    controller_threshold: u8,
    kernel: KernelService,
    updates: Sender<TableUpdate>,
    retired: Receiver<TableUpdate>,
    ui_actions: Receiver<Action>,
}

impl ControlHandle {
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Register definitions. Call [`ControlHandle::configure_all`] afterwards
    /// so compiled bindings pick them up.
    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn looks_resolved(&self, name: &str) -> bool {
        self.symbols.looks_resolved(name)
    }

    pub fn bindings(&self) -> &BindingConfig {
        &self.bindings
    }

    pub fn selection(&self) -> &BindingSelection {
        &self.selection
    }

    pub fn library(&self) -> &ScriptLibrary {
        &self.library
    }

    /// Replace the binding configuration and republish every table.
    pub fn set_bindings(&mut self, bindings: BindingConfig) {
        self.bindings = bindings;
        self.configure_all();
    }

    pub fn select_bindings(&mut self, selection: BindingSelection) {
        self.selection = selection;
        self.configure_all();
    }

    /// Apply an activation request for a binding set: overlays toggle,
    /// other sets replace the base. Returns false for an unknown set.
    pub fn activate_bindings(&mut self, name: &str) -> bool {
        if !self.selection.activate(name, &self.bindings.sets) {
            log::warn!(target: "bindings", "no binding set named {}", name);
            return false;
        }
        log::debug!(target: "bindings", "binding set {} activated", name);
        self.configure_all();
        true
    }

    pub fn set_controller_threshold(&mut self, threshold: u8) {
        self.controller_threshold = threshold;
        self.publish(TableUpdate {
            controller_threshold: Some(threshold),
            ..Default::default()
        });
    }

    /// Compile and load a script, registering it as a symbol under its
    /// name. Bindings and scripts that already invoke the name are
    /// recompiled so they target the new script.
    pub fn load_script(&mut self, default_name: &str, source: &str) -> Result<ScriptId, ScriptError> {
        let script = parse_script(default_name, source, &mut self.symbols)?;
        let name = script.name.clone();
        let properties = script.properties;
        let id = self.library.insert(script);
        self.symbols.register_script(&name, id, properties);
        self.library.resolve(&self.symbols);
        log::debug!(target: "scripts", "loaded script {}", name);

        self.publish(TableUpdate {
            scripts: Some(Arc::new(self.library.clone())),
            ..Default::default()
        });
        self.configure_all();
        Ok(id)
    }

    pub fn configure_keyboard(&mut self) {
        let mut table = BindingTable::new();
        let sets = self.selection.resolve(&self.bindings.sets);
        compile_keyboard(&sets, &mut self.symbols, &mut table);
        self.publish(TableUpdate {
            keyboard: Some(table),
            ..Default::default()
        });
    }

    pub fn configure_midi(&mut self) {
        let mut tables = MidiTables::new();
        let sets = self.selection.resolve(&self.bindings.sets);
        compile_midi(&sets, &mut self.symbols, &mut tables);
        self.publish(TableUpdate {
            midi: Some(tables),
            ..Default::default()
        });
    }

    /// Rebuild and publish every table in one update. Scripts are
    /// republished when symbols they invoke have changed.
    pub fn configure_all(&mut self) {
        let mut keyboard = BindingTable::new();
        let mut midi = MidiTables::new();
        let sets = self.selection.resolve(&self.bindings.sets);
        compile_keyboard(&sets, &mut self.symbols, &mut keyboard);
        compile_midi(&sets, &mut self.symbols, &mut midi);
        let scripts = (self.library.resolve(&self.symbols) > 0).then(|| Arc::new(self.library.clone()));
        self.publish(TableUpdate {
            keyboard: Some(keyboard),
            midi: Some(midi),
            scripts,
            controller_threshold: Some(self.controller_threshold),
        });
    }

    fn publish(&mut self, update: TableUpdate) {
        self.collect_retired();
        match self.updates.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!(target: "bindings", "table update dropped, real-time side is not draining")
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!(target: "bindings", "table update dropped: loop core is gone")
            }
        }
    }

    /// Drop tables the real-time side has replaced.
    pub fn collect_retired(&mut self) -> usize {
        self.retired.try_iter().count()
    }

    /// Handle everything the real-time side asked for. Binding activation is
    /// handled here; the rest goes to `handler`. Every event is completed,
    /// then the envelope pool is topped up.
    pub fn process_kernel_events(&mut self, handler: &mut dyn KernelHandler) -> usize {
        let mut count = 0;
        while let Some(mut event) = self.kernel.receive() {
            count += 1;
            self.handle_kernel_event(&mut event, handler);
            self.kernel.complete(event);
        }
        self.kernel.top_up();
        self.collect_retired();
        count
    }

    fn handle_kernel_event(&mut self, event: &mut KernelEvent, handler: &mut dyn KernelHandler) {
        match event.kind {
            KernelEventType::ActivateBindings => {
                let name = event.arg(0).to_string();
                event.return_code = if self.activate_bindings(&name) { 0 } else { -1 };
            }
            _ => handler.handle(event),
        }
    }

    /// UI-level actions sent up by the real-time side.
    pub fn drain_ui_actions(&self) -> Vec<Action> {
        self.ui_actions.try_iter().collect()
    }
}

/// Real-time half.
pub struct LoopCore {
    binderator: Binderator,
    runtime: ScriptRuntime,
    kernel: KernelPort,
    ui: Sender<Action>,
    updates: Receiver<TableUpdate>,
    retired: Sender<TableUpdate>,
}

impl LoopCore {
    pub fn binderator(&self) -> &Binderator {
        &self.binderator
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    pub fn kernel(&self) -> &KernelPort {
        &self.kernel
    }

    /// Install published updates. Called at block boundaries only.
    pub fn apply_updates(&mut self) {
        while let Ok(update) = self.updates.try_recv() {
            let mut old = TableUpdate::default();
            if let Some(table) = update.keyboard {
                old.keyboard = Some(self.binderator.install_keyboard(table));
            }
            if let Some(tables) = update.midi {
                old.midi = Some(self.binderator.install_midi(tables));
            }
            if let Some(library) = update.scripts {
                old.scripts = Some(self.runtime.install_library(library));
            }
            if let Some(threshold) = update.controller_threshold {
                self.binderator.set_controller_threshold(threshold);
            }
            if !old.is_empty() {
                if let Err(e) = self.retired.try_send(old) {
                    // dropping here deallocates on the real-time thread
                    log::warn!(target: "bindings", "retired tables not returned: {}", e);
                }
            }
        }
    }

    /// A computer keyboard transition.
    pub fn handle_key(&mut self, qualifier: u32, down: bool, engine: &mut dyn Engine) {
        let Some(action) = self.binderator.handle_key(qualifier, down) else {
            return;
        };
        let mut env = DispatchEnv {
            engine,
            kernel: &mut self.kernel,
            ui: &self.ui,
        };
        do_action(action, &mut env, &mut self.runtime);
    }

    pub fn handle_midi_event(&mut self, event: &MidiEvent, engine: &mut dyn Engine) {
        let Some(action) = self.binderator.handle_midi(&event.kind) else {
            return;
        };
        let mut env = DispatchEnv {
            engine,
            kernel: &mut self.kernel,
            ui: &self.ui,
        };
        do_action(action, &mut env, &mut self.runtime);
    }

    /// Raw MIDI bytes from a driver callback.
    pub fn handle_midi_bytes(&mut self, bytes: &[u8], engine: &mut dyn Engine) {
        match parse_midi_message(bytes) {
            Some(kind) => self.handle_midi_event(&MidiEvent::new(0, kind), engine),
            None => log::debug!(target: "midi", "ignoring MIDI message {:02x?}", bytes),
        }
    }

    /// Dispatch an action from the host, the UI or OSC.
    pub fn do_action(&mut self, action: &mut Action, engine: &mut dyn Engine) {
        let mut env = DispatchEnv {
            engine,
            kernel: &mut self.kernel,
            ui: &self.ui,
        };
        do_action(action, &mut env, &mut self.runtime);
    }

    /// End of an audio block's event handling: install updates, then run
    /// script maintenance. Feed a block's key and MIDI events before calling
    /// this for it.
    pub fn process_block(&mut self, frames: u32, sample_rate: u32, engine: &mut dyn Engine) {
        self.apply_updates();
        let mut env = DispatchEnv {
            engine,
            kernel: &mut self.kernel,
            ui: &self.ui,
        };
        self.runtime.maintain(frames, sample_rate, &mut env);
    }

    pub fn finish_event(&mut self, event: EventId) {
        self.runtime.finish_event(event);
    }

    pub fn finish_function(&mut self, symbol: SymbolId) {
        self.runtime.finish_function(symbol);
    }

    /// Stop scripts on a track, or all scripts when `track` is None.
    pub fn cancel_scripts(&mut self, track: Option<TrackId>, engine: &mut dyn Engine) {
        let mut env = DispatchEnv {
            engine,
            kernel: &mut self.kernel,
            ui: &self.ui,
        };
        self.runtime.cancel_scripts(None, track, &mut env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::qualifier::{key_qualifier, MOD_CTRL};
    use crate::kernel::LogKernelHandler;
    use crate::midi::MidiEventKind;
    use crate::symbol::FunctionDefinition;
    use crate::test_support::FakeEngine;
    use ostinato_types::{Binding, BindingSet, TriggerKind};

    fn setup() -> (ControlHandle, LoopCore, FakeEngine) {
        let mut symbols = SymbolTable::new();
        symbols.register_function("Record", FunctionDefinition::sustainable());
        symbols.register_function("Mute", FunctionDefinition::default());
        let (mut control, core) = new(&Config::default(), symbols);

        let mut common = BindingSet::new("Common");
        common.push(Binding::new(TriggerKind::Key, 'r' as i32, "Record"));
        common.push(Binding::new(TriggerKind::Note, 36, "Mute"));
        let mut pedals = BindingSet::overlay("Pedals");
        pedals.push(Binding::new(TriggerKind::Control, 64, "Record"));
        control.set_bindings(BindingConfig {
            sets: vec![common, pedals],
        });
        (control, core, FakeEngine::new(2))
    }

    #[test]
    fn test_tables_install_at_block_start() {
        let (_control, mut core, mut engine) = setup();
        core.handle_key('r' as u32, true, &mut engine);
        assert!(engine.invocations.is_empty());

        core.process_block(256, 44_100, &mut engine);
        core.handle_key('r' as u32, true, &mut engine);
        assert_eq!(engine.invocations.len(), 1);
        assert_eq!(engine.invocations[0].trigger_value, 127);

        core.handle_key('r' as u32, false, &mut engine);
        assert_eq!(engine.invocations.len(), 2);
        assert!(engine.invocations[1].sustain_end);
    }

    #[test]
    fn test_modified_key_does_not_match() {
        let (_control, mut core, mut engine) = setup();
        core.process_block(256, 44_100, &mut engine);
        core.handle_key(key_qualifier('r' as u32, MOD_CTRL), true, &mut engine);
        assert!(engine.invocations.is_empty());
    }

    #[test]
    fn test_midi_bytes() {
        let (_control, mut core, mut engine) = setup();
        core.process_block(256, 44_100, &mut engine);
        core.handle_midi_bytes(&[0x93, 36, 100], &mut engine);
        assert_eq!(engine.invocations.len(), 1);
        assert_eq!(engine.invocations[0].name, "Mute");
        assert_eq!(engine.invocations[0].trigger_value, 100);
    }

    #[test]
    fn test_activation_through_kernel_event() {
        let (mut control, mut core, mut engine) = setup();
        control
            .symbols_mut()
            .register_activation("Pedals", ostinato_types::ActivationKind::Bindings);
        control.configure_all();
        core.process_block(256, 44_100, &mut engine);

        let cc = MidiEvent::new(
            0,
            MidiEventKind::ControlChange {
                channel: 0,
                controller: 64,
                value: 127,
            },
        );
        core.handle_midi_event(&cc, &mut engine);
        assert!(engine.invocations.is_empty());

        let mut pedals = Action::new(
            control.symbols().find("Pedals").unwrap().id,
            "Pedals",
            control.symbols().find("Pedals").unwrap().target(),
        );
        core.do_action(&mut pedals, &mut engine);
        assert_eq!(control.process_kernel_events(&mut LogKernelHandler), 1);
        assert_eq!(control.selection().overlays, vec!["Pedals".to_string()]);

        core.process_block(256, 44_100, &mut engine);
        core.handle_midi_event(&cc, &mut engine);
        assert_eq!(engine.invocations.len(), 1);
        assert_eq!(engine.invocations[0].name, "Record");
    }

    #[test]
    fn test_load_script_and_bind_it() {
        let (mut control, mut core, mut engine) = setup();
        let mut set = BindingSet::new("Scripts");
        set.push(Binding::new(TriggerKind::Key, 'd' as i32, "Double"));
        control.set_bindings(BindingConfig { sets: vec![set] });
        assert!(!control.looks_resolved("Double"));

        control.load_script("double", "!name Double\nMute\nMute\n").unwrap();
        assert!(control.looks_resolved("Double"));

        core.process_block(256, 44_100, &mut engine);
        core.handle_key('d' as u32, true, &mut engine);
        assert_eq!(engine.invocations.len(), 2);
        assert_eq!(core.runtime().active().len(), 1);

        core.process_block(256, 44_100, &mut engine);
        assert!(core.runtime().active().is_empty());
    }

    #[test]
    fn test_script_errors_carry_line() {
        let (mut control, _core, _engine) = setup();
        let err = control.load_script("bad", "Mute\nEndif\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_retired_tables_come_back() {
        let (mut control, mut core, mut engine) = setup();
        core.process_block(256, 44_100, &mut engine);
        control.configure_keyboard();
        core.process_block(256, 44_100, &mut engine);
        assert!(control.collect_retired() >= 1);
    }
}
