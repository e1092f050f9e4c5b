//! Script runtime.
//!
//! Owns the interpreters running on the real-time thread. New script actions
//! either start an interpreter or notify one already running for the same
//! script and track (end of sustain, another click, reentry). Once per audio
//! block [`ScriptRuntime::maintain`] delivers kernel completions, advances
//! the long-press and click timers, resumes waiting interpreters and reclaims
//! finished ones.
//!
//! Interpreters, the deferred queue and the global variable list are sized
//! from `scripts.max_active` when the runtime is built. Past that the
//! real-time thread allocates, as do `$` expansion, script variables and
//! `Call` arguments.

use std::sync::Arc;

use ostinato_types::{EventId, InterpreterId, KernelEventType, SymbolId, TrackId};

use super::interpreter::{ScriptEnv, ScriptInterpreter};
use super::library::ScriptLibrary;
use super::Script;
use crate::action::{Action, Target};
use crate::config::ScriptConfig;
use crate::dispatch::{DispatchEnv, ScriptHost};
use crate::engine::Engine;

/// Rounds of deferred work handled before the rest is dropped. A script
/// that keeps launching itself would otherwise never return.
const MAX_DEFERRED_ROUNDS: usize = 8;

/// Script work requested while an interpreter was running.
#[derive(Debug, Clone)]
pub enum Deferred {
    Launch(Action),
    Cancel {
        author: Option<InterpreterId>,
        track: Option<TrackId>,
    },
}

/// Queues script requests made from inside a running interpreter; the
/// runtime replays them once the interpreter yields.
pub struct DeferringHost<'d> {
    queue: &'d mut Vec<Deferred>,
}

impl<'d> DeferringHost<'d> {
    pub fn new(queue: &'d mut Vec<Deferred>) -> Self {
        Self { queue }
    }
}

impl ScriptHost for DeferringHost<'_> {
    fn run_script(&mut self, action: &Action, _env: &mut DispatchEnv<'_>) {
        self.queue.push(Deferred::Launch(action.clone()));
    }

    fn cancel_scripts(
        &mut self,
        author: Option<InterpreterId>,
        track: Option<TrackId>,
        _env: &mut DispatchEnv<'_>,
    ) {
        self.queue.push(Deferred::Cancel { author, track });
    }
}

pub struct ScriptRuntime {
    config: ScriptConfig,
    library: Arc<ScriptLibrary>,
    /// Running interpreters in launch order.
    active: Vec<ScriptInterpreter>,
    /// Finished interpreters kept for reuse.
    pool: Vec<ScriptInterpreter>,
    next_id: u64,
    /// Audio blocks maintained so far.
    block: u64,
    globals: Vec<(String, String)>,
    deferred: Vec<Deferred>,
    /// Second deferred buffer, swapped in while the first is replayed.
    replay: Vec<Deferred>,
}

impl ScriptRuntime {
    pub fn new(config: ScriptConfig, library: Arc<ScriptLibrary>) -> Self {
        let capacity = config.max_active;
        let idle = Arc::new(Script::default());
        let pool = (0..capacity)
            .map(|_| ScriptInterpreter::new(InterpreterId::new(0), Arc::clone(&idle)))
            .collect();
        Self {
            config,
            library,
            active: Vec::with_capacity(capacity),
            pool,
            next_id: 0,
            block: 0,
            globals: Vec::with_capacity(capacity),
            deferred: Vec::with_capacity(capacity),
            replay: Vec::with_capacity(capacity),
        }
    }

    /// Swap in a new library. Running interpreters keep the scripts they
    /// started with. Returns the old library so it can be dropped off the
    /// real-time thread.
    pub fn install_library(&mut self, library: Arc<ScriptLibrary>) -> Arc<ScriptLibrary> {
        std::mem::replace(&mut self.library, library)
    }

    pub fn library(&self) -> &Arc<ScriptLibrary> {
        &self.library
    }

    pub fn active(&self) -> &[ScriptInterpreter] {
        &self.active
    }

    pub fn global(&self, name: &str) -> Option<&str> {
        self.globals
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Interpreters ready for reuse.
    pub fn idle(&self) -> usize {
        self.pool.len()
    }

    /// Audio blocks maintained so far. A `Wait block` issued during block
    /// `n` is released by the maintenance pass that ends block `n + 1`.
    pub fn block(&self) -> u64 {
        self.block
    }

    /// An engine event completed. Waiting interpreters resume on the next
    /// block.
    pub fn finish_event(&mut self, event: EventId) {
        for interp in &mut self.active {
            interp.finish_event(event);
        }
    }

    /// A function finished executing. Interpreters waiting on it resume on
    /// the next block.
    pub fn finish_function(&mut self, symbol: SymbolId) {
        for interp in &mut self.active {
            interp.finish_function(symbol);
        }
    }

    /// Stop everything, restoring parameters changed by `Use`.
    pub fn stop_all(&mut self, env: &mut DispatchEnv<'_>) {
        for interp in &mut self.active {
            interp.stop(env.engine);
        }
        self.reclaim(env);
    }

    /// Per-block maintenance, after the block's triggers have been handled.
    /// `frames` at `sample_rate` gives the elapsed time for the long-press
    /// and click timers.
    pub fn maintain(&mut self, frames: u32, sample_rate: u32, env: &mut DispatchEnv<'_>) {
        while let Some(event) = env.kernel.poll_completed() {
            for interp in &mut self.active {
                interp.finish_kernel_event(event.id, event.return_code);
            }
            env.kernel.recycle(event);
        }

        let msec = if sample_rate == 0 {
            1
        } else {
            ((frames as u64 * 1000) / sample_rate as u64).max(1) as u32
        };

        for pos in 0..self.active.len() {
            self.run_one(pos, env, true);
            if self.active[pos].advance_sustain(msec, self.config.long_press_msec) {
                self.run_one(pos, env, false);
            }
            if self.active[pos].advance_click(msec, self.config.double_click_msec) {
                self.run_one(pos, env, false);
            }
        }
        self.drain_deferred(env);
        self.reclaim(env);
        self.block += 1;
    }

    fn run_one(&mut self, pos: usize, dispatch: &mut DispatchEnv<'_>, fresh_block: bool) {
        let Some(interp) = self.active.get_mut(pos) else {
            return;
        };
        let mut env = ScriptEnv {
            dispatch,
            library: &self.library,
            globals: &mut self.globals,
            deferred: &mut self.deferred,
            block: self.block,
        };
        interp.run(&mut env, fresh_block);
    }

    /// Start a script or route the trigger to the instance already running
    /// for it.
    fn route(&mut self, action: &Action, env: &mut DispatchEnv<'_>) {
        let Target::Script(target) = action.target else {
            return;
        };
        let Some(script) = self.library.get(target.id).cloned() else {
            log::warn!(target: "scripts", "no script loaded for {}", action.name);
            return;
        };

        let running = |i: &ScriptInterpreter| {
            !i.is_finished() && i.script().id == script.id && i.track() == action.track
        };

        if action.sustain_end {
            let found = self
                .active
                .iter()
                .position(|i| running(i) && i.sustaining && i.trigger_id() == action.trigger_id);
            match found {
                Some(pos) => {
                    if self.active[pos].end_sustain() {
                        self.run_one(pos, env, false);
                    }
                }
                None => {
                    log::debug!(target: "scripts", "{}: release with nothing sustaining", script.name);
                }
            }
            return;
        }

        if !target.continuous {
            if let Some(pos) = self.active.iter().position(running) {
                let interp = &mut self.active[pos];
                if interp.clicking && interp.trigger_id() == action.trigger_id {
                    if interp.click() {
                        self.run_one(pos, env, false);
                    }
                    return;
                }
                if let Some(label) = interp.script().labels.reentry {
                    interp.notify(label);
                    self.run_one(pos, env, false);
                    return;
                }
            }
        }

        self.launch(script, action, env);
    }

    fn launch(&mut self, script: Arc<Script>, action: &Action, env: &mut DispatchEnv<'_>) {
        self.next_id += 1;
        let id = InterpreterId::new(self.next_id);
        let interp = match self.pool.pop() {
            Some(mut interp) => {
                interp.reset(id, script);
                interp
            }
            None => ScriptInterpreter::new(id, script),
        };
        self.active.push(interp);
        let pos = self.active.len() - 1;
        self.active[pos].start(action);
        log::debug!(
            target: "scripts",
            "started {} {} on {}",
            self.active[pos].script().name,
            id,
            action.track.map(|t| t.to_string()).unwrap_or_else(|| "global".into())
        );
        self.run_one(pos, env, false);
    }

    fn cancel(&mut self, author: Option<InterpreterId>, track: Option<TrackId>, engine: &mut dyn Engine) {
        for interp in &mut self.active {
            if Some(interp.id()) == author {
                continue;
            }
            if track.is_none() || interp.track() == track {
                log::debug!(target: "scripts", "cancelling {} {}", interp.script().name, interp.id());
                interp.stop(engine);
            }
        }
    }

    fn drain_deferred(&mut self, env: &mut DispatchEnv<'_>) {
        let mut rounds = 0;
        while !self.deferred.is_empty() {
            rounds += 1;
            if rounds > MAX_DEFERRED_ROUNDS {
                log::warn!(
                    target: "scripts",
                    "dropping {} script requests, scripts keep triggering each other",
                    self.deferred.len()
                );
                self.deferred.clear();
                break;
            }
            let mut pending = std::mem::take(&mut self.replay);
            std::mem::swap(&mut self.deferred, &mut pending);
            for item in pending.drain(..) {
                match item {
                    Deferred::Launch(action) => self.route(&action, env),
                    Deferred::Cancel { author, track } => self.cancel(author, track, env.engine),
                }
            }
            self.replay = pending;
        }
    }

    /// Remove finished interpreters, in launch order.
    fn reclaim(&mut self, env: &mut DispatchEnv<'_>) {
        let mut i = 0;
        while i < self.active.len() {
            if !self.active[i].is_finished() {
                i += 1;
                continue;
            }
            let mut interp = self.active.remove(i);
            env.engine.script_finished(interp.id());
            if interp.request_id() != 0 {
                env.kernel.request(
                    KernelEventType::ScriptFinished,
                    &[interp.script().name.as_str()],
                    interp.request_id(),
                );
            }
            interp.restore_uses(env.engine);
            log::debug!(target: "scripts", "finished {} {}", interp.script().name, interp.id());
            if self.pool.len() < self.config.max_active {
                self.pool.push(interp);
            }
        }
    }
}

impl ScriptHost for ScriptRuntime {
    fn run_script(&mut self, action: &Action, env: &mut DispatchEnv<'_>) {
        self.route(action, env);
        self.drain_deferred(env);
    }

    fn cancel_scripts(
        &mut self,
        author: Option<InterpreterId>,
        track: Option<TrackId>,
        env: &mut DispatchEnv<'_>,
    ) {
        self.cancel(author, track, env.engine);
        self.drain_deferred(env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Scope, ScriptTarget};
    use crate::config::KernelConfig;
    use crate::kernel::{self, KernelPort, KernelService};
    use crate::script::parse_script;
    use crate::symbol::{FunctionDefinition, SymbolTable};
    use crate::test_support::FakeEngine;
    use crossbeam_channel::Sender;
    use ostinato_types::{ResetScope, ScriptId};

    struct Harness {
        engine: FakeEngine,
        service: KernelService,
        port: KernelPort,
        ui: Sender<Action>,
        symbols: SymbolTable,
        library: ScriptLibrary,
        runtime: ScriptRuntime,
    }

    impl Harness {
        fn new() -> Self {
            let (service, port) = kernel::channel(&KernelConfig::default());
            let (ui, _) = crossbeam_channel::bounded(4);
            let mut symbols = SymbolTable::new();
            symbols.register_function("Mute", FunctionDefinition::default());
            symbols.register_function("GlobalReset", FunctionDefinition::reset(ResetScope::Global));
            Self {
                engine: FakeEngine::new(2),
                service,
                port,
                ui,
                symbols,
                library: ScriptLibrary::new(),
                runtime: ScriptRuntime::new(ScriptConfig::default(), Arc::new(ScriptLibrary::new())),
            }
        }

        fn load(&mut self, source: &str) -> Action {
            let script = parse_script("test", source, &mut self.symbols).unwrap();
            let props = script.properties;
            let name = script.name.clone();
            let id = self.library.insert(script);
            self.runtime.install_library(Arc::new(self.library.clone()));
            Action::new(
                SymbolId::new(0),
                name.as_str(),
                Target::Script(ScriptTarget {
                    id,
                    continuous: props.continuous,
                    sustainable: props.sustainable,
                    focus_lockable: props.focus_lockable,
                }),
            )
            .with_scope(Scope::Track(TrackId::new(0)))
        }

        fn trigger(&mut self, action: &Action) {
            let mut action = action.clone();
            action.track = Some(TrackId::new(0));
            let mut env = DispatchEnv {
                engine: &mut self.engine,
                kernel: &mut self.port,
                ui: &self.ui,
            };
            self.runtime.run_script(&action, &mut env);
        }

        /// One block of 441 frames at 44.1kHz, 10ms.
        fn block(&mut self) {
            let mut env = DispatchEnv {
                engine: &mut self.engine,
                kernel: &mut self.port,
                ui: &self.ui,
            };
            self.runtime.maintain(441, 44_100, &mut env);
        }

        fn echoes(&self) -> Vec<String> {
            let mut out = Vec::new();
            while let Some(event) = self.service.receive() {
                if event.kind == KernelEventType::Echo {
                    out.push(event.arg(0).to_string());
                }
            }
            out
        }
    }

    #[test]
    fn test_finished_scripts_are_reclaimed() {
        let mut h = Harness::new();
        let action = h.load("Mute\n");
        h.trigger(&action);
        assert_eq!(h.engine.invocations.len(), 1);
        assert_eq!(h.runtime.active().len(), 1);
        h.block();
        assert!(h.runtime.active().is_empty());
        assert_eq!(h.engine.finished, vec![InterpreterId::new(1)]);
    }

    #[test]
    fn test_request_id_reports_completion() {
        let mut h = Harness::new();
        let mut action = h.load("!name Fill\nMute\n");
        action.request_id = 42;
        h.trigger(&action);
        h.block();
        let event = h.service.receive().unwrap();
        assert_eq!(event.kind, KernelEventType::ScriptFinished);
        assert_eq!(event.arg(0), "Fill");
        assert_eq!(event.request_id, 42);
    }

    #[test]
    fn test_long_press_and_release() {
        let mut h = Harness::new();
        let mut action = h.load(
            "!sustain 30\nEcho down\nEnd\nLabel sustain\nEcho held $sustainCount\nEnd\n\
             Label endSustain\nEcho up\nEnd\n",
        );
        action.trigger_id = 77;
        action.sustain_id = 77;
        h.trigger(&action);
        assert_eq!(h.echoes(), vec!["down"]);

        for _ in 0..3 {
            h.block();
        }
        assert_eq!(h.echoes(), vec!["held 1"]);
        assert_eq!(h.runtime.active().len(), 1);

        action.sustain_end = true;
        h.trigger(&action);
        assert_eq!(h.echoes(), vec!["up"]);
        h.block();
        assert!(h.runtime.active().is_empty());
    }

    #[test]
    fn test_multiclick() {
        let mut h = Harness::new();
        let mut action = h.load(
            "!multiclick 50\nEcho first\nEnd\nLabel click\nEcho click $clickCount\nEnd\n\
             Label endClick\nEcho done $clickCount\nEnd\n",
        );
        action.trigger_id = 5;
        h.trigger(&action);
        h.block();
        h.trigger(&action);
        assert_eq!(h.echoes(), vec!["first", "click 2"]);
        assert_eq!(h.runtime.active().len(), 1);

        for _ in 0..6 {
            h.block();
        }
        assert_eq!(h.echoes(), vec!["done 2"]);
        assert!(h.runtime.active().is_empty());
    }

    #[test]
    fn test_reentry_label() {
        let mut h = Harness::new();
        let action = h.load("Wait block\nWait block\nEnd\nLabel reentry\nEcho again\nEnd\n");
        h.trigger(&action);
        h.trigger(&action);
        assert_eq!(h.echoes(), vec!["again"]);
        assert_eq!(h.runtime.active().len(), 1);
    }

    #[test]
    fn test_without_reentry_a_second_instance_starts() {
        let mut h = Harness::new();
        let action = h.load("Wait block\nMute\n");
        h.trigger(&action);
        h.trigger(&action);
        assert_eq!(h.runtime.active().len(), 2);
        h.block();
        h.block();
        assert_eq!(h.engine.invocations.len(), 2);
    }

    #[test]
    fn test_click_wins_over_reentry() {
        let mut h = Harness::new();
        let mut action = h.load(
            "!multiclick 50\nEcho first\nWait block\nWait block\nEnd\n\
             Label click\nEcho click $clickCount\nEnd\nLabel reentry\nEcho again\nEnd\n",
        );
        action.trigger_id = 9;
        h.trigger(&action);
        h.trigger(&action);
        assert_eq!(h.echoes(), vec!["first", "click 2"]);
        assert_eq!(h.runtime.active().len(), 1);
        assert_eq!(h.runtime.active()[0].click_count(), 2);
    }

    #[test]
    fn test_reentry_once_the_click_window_closes() {
        let mut h = Harness::new();
        let mut action = h.load(
            "!multiclick 20\nEcho first\nWait 1000\nEnd\n\
             Label click\nEcho click\nEnd\nLabel reentry\nEcho again\nEnd\n",
        );
        h.engine.schedule_events = true;
        action.trigger_id = 9;
        h.trigger(&action);
        for _ in 0..3 {
            h.block();
        }
        h.trigger(&action);
        assert_eq!(h.echoes(), vec!["first", "again"]);
    }

    #[test]
    fn test_block_wait_outlasts_the_launch_block() {
        let mut h = Harness::new();
        let action = h.load("Wait block\nMute\n");
        h.trigger(&action);
        h.block();
        assert!(h.engine.invocations.is_empty());
        assert_eq!(h.runtime.block(), 1);
        h.block();
        assert_eq!(h.engine.invocations.len(), 1);
    }

    #[test]
    fn test_interpreters_come_from_the_pool() {
        let mut h = Harness::new();
        let max = ScriptConfig::default().max_active;
        assert_eq!(h.runtime.idle(), max);
        let action = h.load("Wait block\nMute\n");
        h.trigger(&action);
        h.trigger(&action);
        assert_eq!(h.runtime.idle(), max - 2);
        h.block();
        h.block();
        assert!(h.runtime.active().is_empty());
        assert_eq!(h.runtime.idle(), max);
    }

    #[test]
    fn test_continuous_always_launches() {
        let mut h = Harness::new();
        let action = h.load("!continuous\nWait block\nEnd\nLabel reentry\nEcho again\n");
        h.trigger(&action);
        h.trigger(&action);
        assert!(h.echoes().is_empty());
        assert_eq!(h.runtime.active().len(), 2);
    }

    #[test]
    fn test_global_reset_spares_its_author() {
        let mut h = Harness::new();
        let waiting = h.load("!name Waiter\nWait block\nWait block\nMute\n");
        h.trigger(&waiting);
        let resetter = h.load("!name Resetter\nGlobalReset\nWait block\nEcho survived\n");
        h.trigger(&resetter);
        assert_eq!(h.runtime.active().len(), 2);
        assert!(h.runtime.active()[0].is_finished());

        h.block();
        h.block();
        assert_eq!(h.echoes(), vec!["survived"]);
        let muted = h.engine.invocations.iter().filter(|i| i.name == "Mute").count();
        assert_eq!(muted, 0);
    }

    #[test]
    fn test_kernel_completion_resumes_prompt() {
        let mut h = Harness::new();
        let action = h.load("Prompt Sure?\nIf returnCode == 1\nEcho yes\nEndif\n");
        h.trigger(&action);
        let mut event = h.service.receive().unwrap();
        event.return_code = 1;
        h.service.complete(event);
        h.block();
        assert_eq!(h.echoes(), vec!["yes"]);
    }

    #[test]
    fn test_script_launching_itself_is_bounded() {
        let mut h = Harness::new();
        h.symbols.register_script(
            "Again",
            ScriptId::new(0),
            crate::symbol::ScriptProperties::default(),
        );
        let action = h.load("!name Again\nAgain\n");
        h.trigger(&action);
        // every launch defers the next; the chain is cut, not run forever
        assert!(h.runtime.active().len() <= MAX_DEFERRED_ROUNDS + 1);
    }
}
