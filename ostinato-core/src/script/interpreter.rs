//! Script interpreter.
//!
//! One interpreter per running script invocation. [`ScriptInterpreter::run`]
//! executes statements until the script ends or a wait frame blocks it; the
//! runtime calls it again every block and whenever a completion arrives.

use std::borrow::Cow;
use std::sync::Arc;

use ostinato_types::{EventId, InterpreterId, KernelEventId, SymbolId, TrackId, TriggerKind};

use super::expand::{self, is_identifier, positional, Reference};
use super::library::ScriptLibrary;
use super::runtime::{Deferred, DeferringHost};
use super::stack::{take_lowest, Frame, IteratorKind, WaitFrame, MAX_ITERATED_TRACKS};
use super::statement::{CallTarget, CompareOp, Condition, Invocation, Statement, WaitKind};
use super::Script;
use crate::action::{Action, Scope, MAX_ACTION_ARGS};
use crate::binding::compiler::trigger_number;
use crate::dispatch::{do_action, DispatchEnv};
use crate::engine::Engine;

/// Statements executed in one `run` before the interpreter gives up the
/// thread. Guards against scripts that loop without waiting.
const MAX_STEPS: usize = 1000;

/// Deepest allowed call nesting.
const MAX_DEPTH: usize = 64;

/// Everything an interpreter touches outside itself while it runs.
pub struct ScriptEnv<'e, 'a> {
    pub dispatch: &'e mut DispatchEnv<'a>,
    pub library: &'e ScriptLibrary,
    /// Global variables, names compared ignoring case.
    pub globals: &'e mut Vec<(String, String)>,
    pub deferred: &'e mut Vec<Deferred>,
    /// Number of the current audio block.
    pub block: u64,
}

/// Variables computed from interpreter and engine state.
#[derive(Debug, Clone, Copy)]
enum Internal {
    SustainCount,
    ClickCount,
    TriggerValue,
    TriggerNumber,
    TriggerOffset,
    ReturnCode,
    Track,
    TrackCount,
    ActiveTrack,
}

const INTERNALS: [(&str, Internal); 9] = [
    ("sustainCount", Internal::SustainCount),
    ("clickCount", Internal::ClickCount),
    ("triggerValue", Internal::TriggerValue),
    ("triggerNumber", Internal::TriggerNumber),
    ("triggerOffset", Internal::TriggerOffset),
    ("returnCode", Internal::ReturnCode),
    ("track", Internal::Track),
    ("trackCount", Internal::TrackCount),
    ("activeTrack", Internal::ActiveTrack),
];

/// Initial sizes for per-interpreter storage, so a pooled interpreter
/// rarely grows on the real-time thread.
const FRAME_CAPACITY: usize = 16;
const VARIABLE_CAPACITY: usize = 8;

enum Flow {
    Next,
    Goto(usize),
    /// The statement already moved `pc`.
    Continue,
    End,
}

enum NextStep {
    Loop(Option<TrackId>),
    Done(Option<Option<TrackId>>),
    Unmatched,
}

/// A parameter value saved by `Use`, put back when the script ends.
#[derive(Debug, Clone)]
struct SavedUse {
    track: Option<TrackId>,
    name: String,
    value: i32,
}

#[derive(Debug)]
pub struct ScriptInterpreter {
    id: InterpreterId,
    /// The script this invocation started; labels belong to it.
    script: Arc<Script>,
    /// The script currently executing, different from `script` inside a
    /// cross-script call.
    current: Arc<Script>,
    pc: Option<usize>,
    stack: Vec<Frame>,
    track: Option<TrackId>,

    trigger: TriggerKind,
    trigger_id: u32,
    trigger_value: i32,
    trigger_offset: i32,
    binding_args: String,
    request_id: u32,

    pub(crate) sustaining: bool,
    sustain_elapsed: u32,
    sustain_count: u32,
    pub(crate) clicking: bool,
    click_elapsed: u32,
    click_count: u32,

    last_event: Option<EventId>,
    last_kernel_event: Option<KernelEventId>,
    return_code: i32,

    vars: Vec<(String, String)>,
    uses: Vec<SavedUse>,
}

impl ScriptInterpreter {
    pub fn new(id: InterpreterId, script: Arc<Script>) -> Self {
        Self {
            id,
            current: Arc::clone(&script),
            script,
            pc: None,
            stack: Vec::with_capacity(FRAME_CAPACITY),
            track: None,
            trigger: TriggerKind::Host,
            trigger_id: 0,
            trigger_value: 0,
            trigger_offset: 0,
            binding_args: String::with_capacity(MAX_ACTION_ARGS),
            request_id: 0,
            sustaining: false,
            sustain_elapsed: 0,
            sustain_count: 0,
            clicking: false,
            click_elapsed: 0,
            click_count: 0,
            last_event: None,
            last_kernel_event: None,
            return_code: 0,
            vars: Vec::with_capacity(VARIABLE_CAPACITY),
            uses: Vec::with_capacity(VARIABLE_CAPACITY),
        }
    }

    /// Reinitialize a pooled interpreter, keeping its allocations.
    pub fn reset(&mut self, id: InterpreterId, script: Arc<Script>) {
        self.id = id;
        self.current = Arc::clone(&script);
        self.script = script;
        self.pc = None;
        self.stack.clear();
        self.track = None;
        self.trigger = TriggerKind::Host;
        self.trigger_id = 0;
        self.trigger_value = 0;
        self.trigger_offset = 0;
        self.binding_args.clear();
        self.request_id = 0;
        self.sustaining = false;
        self.sustain_elapsed = 0;
        self.sustain_count = 0;
        self.clicking = false;
        self.click_elapsed = 0;
        self.click_count = 0;
        self.last_event = None;
        self.last_kernel_event = None;
        self.return_code = 0;
        self.vars.clear();
        self.uses.clear();
    }

    /// Take the trigger context from the action that launched the script.
    pub fn start(&mut self, action: &Action) {
        self.track = action.track;
        self.trigger = action.trigger;
        self.trigger_id = action.trigger_id;
        self.trigger_value = action.trigger_value;
        self.trigger_offset = action.trigger_offset;
        self.binding_args.clear();
        self.binding_args.push_str(&action.args);
        self.request_id = action.request_id;
        self.sustaining = self.script.properties.sustainable && action.sustain_id != 0;
        self.clicking = self.script.multiclick && action.trigger_id != 0;
        self.click_count = 1;
        self.pc = Some(0);
    }

    pub fn id(&self) -> InterpreterId {
        self.id
    }

    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    pub fn track(&self) -> Option<TrackId> {
        self.track
    }

    pub fn trigger_id(&self) -> u32 {
        self.trigger_id
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn sustain_count(&self) -> u32 {
        self.sustain_count
    }

    pub fn click_count(&self) -> u32 {
        self.click_count
    }

    pub fn return_code(&self) -> i32 {
        self.return_code
    }

    /// Blocked on a wait frame.
    pub fn is_waiting(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Wait(w)) if !w.is_satisfied())
    }

    /// Nothing left to run and no timer that could notify it again.
    pub fn is_finished(&self) -> bool {
        self.pc.is_none() && self.stack.is_empty() && !self.sustaining && !self.clicking
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Jump to a label of the top-level script, remembering where to resume.
    pub fn notify(&mut self, label: usize) {
        self.stack.push(Frame::Label {
            script: Arc::clone(&self.current),
            resume: self.pc,
        });
        self.current = Arc::clone(&self.script);
        self.pc = Some(label + 1);
    }

    /// Abandon the script. Parameters changed by `Use` are restored.
    pub fn stop(&mut self, engine: &mut dyn Engine) {
        self.stack.clear();
        self.pc = None;
        self.sustaining = false;
        self.clicking = false;
        self.restore_uses(engine);
    }

    pub fn restore_uses(&mut self, engine: &mut dyn Engine) {
        for saved in self.uses.drain(..) {
            engine.set_parameter(saved.track, &saved.name, saved.value);
        }
    }

    pub fn finish_event(&mut self, event: EventId) {
        for frame in &mut self.stack {
            if let Frame::Wait(w) = frame {
                if w.event == Some(event) {
                    w.event = None;
                }
            }
        }
        if self.last_event == Some(event) {
            self.last_event = None;
        }
    }

    pub fn finish_kernel_event(&mut self, event: KernelEventId, return_code: i32) {
        let mut ours = self.last_kernel_event == Some(event);
        for frame in &mut self.stack {
            if let Frame::Wait(w) = frame {
                if w.kernel == Some(event) {
                    w.kernel = None;
                    ours = true;
                }
            }
        }
        if ours {
            self.return_code = return_code;
        }
        if self.last_kernel_event == Some(event) {
            self.last_kernel_event = None;
        }
    }

    pub fn finish_function(&mut self, symbol: SymbolId) {
        for frame in &mut self.stack {
            if let Frame::Wait(w) = frame {
                if w.function == Some(symbol) {
                    w.function = None;
                }
            }
        }
    }

    /// Advance the long-press timer. Returns true when the sustain label was
    /// notified and the interpreter should run.
    pub fn advance_sustain(&mut self, msec: u32, default_threshold: u32) -> bool {
        if !self.sustaining {
            return false;
        }
        let threshold = self.script.sustain_msec.unwrap_or(default_threshold).max(1);
        self.sustain_elapsed += msec;
        if self.sustain_elapsed < threshold {
            return false;
        }
        self.sustain_elapsed = 0;
        self.sustain_count += 1;
        match self.script.labels.sustain {
            Some(label) => {
                self.notify(label);
                true
            }
            None => false,
        }
    }

    /// The trigger went up. Returns true when the end-sustain label was
    /// notified.
    pub fn end_sustain(&mut self) -> bool {
        self.sustaining = false;
        self.sustain_elapsed = 0;
        match self.script.labels.end_sustain {
            Some(label) => {
                self.notify(label);
                true
            }
            None => false,
        }
    }

    /// Another press inside the click window. Returns true when the click
    /// label was notified.
    pub fn click(&mut self) -> bool {
        self.click_count += 1;
        self.click_elapsed = 0;
        match self.script.labels.click {
            Some(label) => {
                self.notify(label);
                true
            }
            None => false,
        }
    }

    /// Advance the click window. Returns true when it closed and the
    /// end-click label was notified.
    pub fn advance_click(&mut self, msec: u32, default_window: u32) -> bool {
        if !self.clicking {
            return false;
        }
        let window = self.script.click_msec.unwrap_or(default_window);
        self.click_elapsed += msec;
        if self.click_elapsed <= window {
            return false;
        }
        self.clicking = false;
        match self.script.labels.end_click {
            Some(label) => {
                self.notify(label);
                true
            }
            None => false,
        }
    }

    /// Run until the script ends or blocks.
    ///
    /// `fresh_block` releases `Wait block` frames issued before
    /// `env.block`; it is set once per audio block by the runtime.
    pub fn run(&mut self, env: &mut ScriptEnv<'_, '_>, fresh_block: bool) {
        if fresh_block {
            for frame in &mut self.stack {
                if let Frame::Wait(w) = frame {
                    w.release_block(env.block);
                }
            }
        }

        let mut steps = 0;
        loop {
            if let Some(Frame::Wait(w)) = self.stack.last() {
                if !w.is_satisfied() {
                    return;
                }
                self.stack.pop();
                continue;
            }

            let Some(index) = self.pc.filter(|&i| i < self.current.statements.len()) else {
                self.pc = None;
                if self.stack.is_empty() {
                    return;
                }
                self.end_script();
                continue;
            };

            steps += 1;
            if steps > MAX_STEPS {
                log::warn!(
                    target: "scripts",
                    "{}: {} statements without a wait, suspending",
                    self.current.name,
                    MAX_STEPS
                );
                return;
            }

            let script = Arc::clone(&self.current);
            match self.evaluate(&script, index, env) {
                Flow::Next => self.pc = Some(index + 1),
                Flow::Goto(target) => self.pc = Some(target),
                Flow::Continue => {}
                Flow::End => self.end_script(),
            }
        }
    }

    /// Unwind to the frame that resumes execution, or finish.
    fn end_script(&mut self) {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Label { script, resume } => {
                    self.current = script;
                    self.pc = resume;
                    return;
                }
                Frame::Call {
                    caller: Some(caller),
                    return_to,
                    ..
                } => {
                    self.current = caller;
                    self.pc = Some(return_to);
                    return;
                }
                Frame::Iterator {
                    kind: IteratorKind::Tracks { saved, .. },
                    ..
                } => self.track = saved,
                Frame::Call { caller: None, .. } | Frame::Warp | Frame::Iterator { .. } | Frame::Wait(_) => {}
            }
        }
        self.pc = None;
    }

    fn evaluate(&mut self, script: &Script, index: usize, env: &mut ScriptEnv<'_, '_>) -> Flow {
        let line = script.line_of(index);
        match &script.statements[index] {
            Statement::Label { .. } => {
                // running into a label ends the notified block
                if matches!(self.stack.last(), Some(Frame::Label { .. })) {
                    if let Some(Frame::Label { script, resume }) = self.stack.pop() {
                        self.current = script;
                        self.pc = resume;
                    }
                    return Flow::Continue;
                }
                Flow::Next
            }
            // a jumped-to label is not a block boundary
            Statement::Jump { label } => Flow::Goto(label + 1),
            Statement::Call { target, args } => self.call(target, args, index, line, env),
            Statement::Warp { proc } => {
                self.stack.push(Frame::Warp);
                Flow::Goto(proc + 1)
            }
            Statement::Proc { end, .. } => Flow::Goto(end + 1),
            Statement::Endproc => match self.stack.pop() {
                Some(Frame::Call {
                    caller: None,
                    return_to,
                    ..
                }) => Flow::Goto(return_to),
                Some(Frame::Warp) => Flow::End,
                Some(frame) => {
                    log::warn!(
                        target: "scripts",
                        "{} line {}: Endproc with open {}",
                        script.name,
                        line,
                        frame.kind()
                    );
                    self.stack.push(frame);
                    Flow::End
                }
                None => Flow::End,
            },
            Statement::Variable {
                global,
                name,
                value,
            } => {
                let value = self.expand(value, env).into_owned();
                if !*global {
                    self.set_local(name, value);
                } else if !env.globals.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                    env.globals.push((name.to_string(), value));
                }
                Flow::Next
            }
            Statement::Set { name, value } => {
                if self.internal(name, &*env).is_some() {
                    log::warn!(
                        target: "scripts",
                        "{} line {}: {} is read-only",
                        script.name,
                        line,
                        name
                    );
                    return Flow::Next;
                }
                let value = self.expand(value, env).into_owned();
                if self.variable(name).is_some() {
                    self.set_local(name, value);
                } else if let Some((_, global)) =
                    env.globals.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name))
                {
                    *global = value;
                } else {
                    self.set_local(name, value);
                }
                Flow::Next
            }
            Statement::Use { name, value } => {
                self.use_parameter(name, value, env);
                Flow::Next
            }
            Statement::If {
                condition,
                otherwise,
            } => {
                if self.condition(condition, env) {
                    Flow::Next
                } else {
                    Flow::Goto(otherwise + 1)
                }
            }
            Statement::Else { end } => Flow::Goto(end + 1),
            Statement::Endif => Flow::Next,
            Statement::Repeat { count, next } => {
                let count = self.operand(count, env);
                let n = count.trim().parse::<i64>().unwrap_or_else(|_| {
                    log::warn!(
                        target: "scripts",
                        "{} line {}: bad repeat count '{}'",
                        script.name,
                        line,
                        count
                    );
                    0
                });
                if n <= 0 {
                    return Flow::Goto(next + 1);
                }
                self.stack.push(Frame::Iterator {
                    start: index,
                    kind: IteratorKind::Repeat {
                        remaining: (n - 1).min(u32::MAX as i64) as u32,
                    },
                });
                Flow::Next
            }
            Statement::For { tracks, next } => {
                let mut remaining = self.track_mask(tracks, env);
                let Some(first) = take_lowest(&mut remaining) else {
                    return Flow::Goto(next + 1);
                };
                self.stack.push(Frame::Iterator {
                    start: index,
                    kind: IteratorKind::Tracks {
                        remaining,
                        saved: self.track,
                    },
                });
                self.track = Some(first);
                Flow::Next
            }
            Statement::Next { start } => self.next(*start, script, line),
            Statement::Wait(kind) => {
                self.wait(kind, script, line, env);
                Flow::Next
            }
            Statement::Kernel { kind, args } => {
                let Some(mut event) = env.dispatch.kernel.alloc() else {
                    return Flow::Next;
                };
                event.kind = *kind;
                event.request_id = self.request_id;
                for (i, arg) in args.iter().enumerate() {
                    let text = self.expand(arg, env);
                    event.set_arg(i, &text);
                }
                let id = env.dispatch.kernel.send(event);
                self.last_kernel_event = id;
                if let Some(id) = id.filter(|_| kind.expects_reply()) {
                    self.stack.push(Frame::Wait(WaitFrame {
                        kernel: Some(id),
                        ..Default::default()
                    }));
                }
                Flow::Next
            }
            Statement::End => Flow::End,
            Statement::Invoke(invocation) => {
                self.invoke(invocation, script, line, env);
                Flow::Next
            }
        }
    }

    fn call(
        &mut self,
        target: &CallTarget,
        args: &str,
        index: usize,
        line: usize,
        env: &mut ScriptEnv<'_, '_>,
    ) -> Flow {
        if self.stack.len() >= MAX_DEPTH {
            log::warn!(target: "scripts", "{} line {}: calls nested too deep", self.current.name, line);
            return Flow::Next;
        }
        let args = self.expand(args, env).into_owned();
        match target {
            CallTarget::Proc(proc) => {
                self.stack.push(Frame::Call {
                    caller: None,
                    return_to: index + 1,
                    args,
                });
                Flow::Goto(proc + 1)
            }
            CallTarget::Script(name) => {
                let Some(callee) = env.library.find(name).cloned() else {
                    log::warn!(
                        target: "scripts",
                        "{} line {}: no script or proc named {}",
                        self.current.name,
                        line,
                        name
                    );
                    return Flow::Next;
                };
                self.stack.push(Frame::Call {
                    caller: Some(Arc::clone(&self.current)),
                    return_to: index + 1,
                    args,
                });
                self.current = callee;
                Flow::Goto(0)
            }
        }
    }

    fn next(&mut self, start: usize, script: &Script, line: usize) -> Flow {
        let step = match self.stack.last_mut() {
            Some(Frame::Iterator { start: s, kind }) if *s == start => match kind {
                IteratorKind::Repeat { remaining } if *remaining > 0 => {
                    *remaining -= 1;
                    NextStep::Loop(self.track)
                }
                IteratorKind::Tracks { remaining, .. } if *remaining != 0 => NextStep::Loop(take_lowest(remaining)),
                IteratorKind::Repeat { .. } => NextStep::Done(None),
                IteratorKind::Tracks { saved, .. } => NextStep::Done(Some(*saved)),
            },
            _ => NextStep::Unmatched,
        };
        match step {
            NextStep::Loop(track) => {
                self.track = track;
                Flow::Goto(start + 1)
            }
            NextStep::Done(restore) => {
                self.stack.pop();
                if let Some(saved) = restore {
                    self.track = saved;
                }
                Flow::Next
            }
            NextStep::Unmatched => {
                log::warn!(target: "scripts", "{} line {}: Next without a loop", script.name, line);
                Flow::Next
            }
        }
    }

    fn wait(&mut self, kind: &WaitKind, script: &Script, line: usize, env: &mut ScriptEnv<'_, '_>) {
        let frame = match kind {
            WaitKind::Last => match self.last_event {
                Some(event) => WaitFrame {
                    event: Some(event),
                    ..Default::default()
                },
                None => {
                    log::debug!(target: "scripts", "{} line {}: nothing to wait for", script.name, line);
                    return;
                }
            },
            WaitKind::Thread => match self.last_kernel_event {
                Some(kernel) => WaitFrame {
                    kernel: Some(kernel),
                    ..Default::default()
                },
                None => return,
            },
            WaitKind::Block => WaitFrame {
                block: Some(env.block),
                ..Default::default()
            },
            WaitKind::Msec(expr) => {
                let text = self.operand(expr, env);
                let Ok(msec) = text.trim().parse::<u32>() else {
                    log::warn!(
                        target: "scripts",
                        "{} line {}: bad wait time '{}'",
                        script.name,
                        line,
                        text
                    );
                    return;
                };
                let engine = &mut *env.dispatch.engine;
                let track = self.track.unwrap_or_else(|| engine.active_track());
                match engine.schedule_wait(track, msec) {
                    Some(event) => {
                        self.last_event = Some(event);
                        WaitFrame {
                            event: Some(event),
                            ..Default::default()
                        }
                    }
                    None => {
                        log::warn!(target: "scripts", "{} line {}: wait not scheduled", script.name, line);
                        return;
                    }
                }
            }
            WaitKind::Function(symbol) => WaitFrame {
                function: Some(*symbol),
                ..Default::default()
            },
        };
        self.stack.push(Frame::Wait(frame));
    }

    fn invoke(&mut self, invocation: &Invocation, script: &Script, line: usize, env: &mut ScriptEnv<'_, '_>) {
        if !invocation.target.is_resolved() {
            log::warn!(
                target: "scripts",
                "{} line {}: unresolved symbol {}",
                script.name,
                line,
                invocation.name
            );
            return;
        }
        let mut action = Action::new(invocation.symbol, Arc::clone(&invocation.name), invocation.target)
            .with_trigger(TriggerKind::Script)
            .with_scope(self.track.map(Scope::Track).unwrap_or_default());
        match self.expand(&invocation.args, env) {
            Cow::Borrowed(_) => action.args = Arc::clone(&invocation.args),
            Cow::Owned(expanded) => action.set_args(&expanded),
        }
        if let Ok(value) = action.args.trim().parse::<i32>() {
            action = action.with_value(value);
        }
        action.level = invocation.level;
        action.interpreter = Some(self.id);

        let mut host = DeferringHost::new(&mut *env.deferred);
        do_action(&mut action, &mut *env.dispatch, &mut host);

        if action.event.is_some() {
            self.last_event = action.event;
        }
        if action.kernel_event.is_some() {
            self.last_kernel_event = action.kernel_event;
        }
    }

    fn use_parameter(&mut self, name: &str, value: &str, env: &mut ScriptEnv<'_, '_>) {
        let text = self.operand(value, env);
        let Ok(value) = text.trim().parse::<i32>() else {
            log::warn!(target: "scripts", "{}: bad value '{}' for {}", self.current.name, text, name);
            return;
        };
        let track = self.track;
        let engine = &mut *env.dispatch.engine;
        let saved = self
            .uses
            .iter()
            .any(|u| u.track == track && u.name.eq_ignore_ascii_case(name));
        if !saved {
            if let Some(previous) = engine.get_parameter(track, name) {
                self.uses.push(SavedUse {
                    track,
                    name: name.to_string(),
                    value: previous,
                });
            }
        }
        engine.set_parameter(track, name, value);
    }

    fn set_local(&mut self, name: &str, value: String) {
        match self.vars.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, slot)) => *slot = value,
            None => self.vars.push((name.to_string(), value)),
        }
    }

    fn condition(&self, condition: &Condition, env: &ScriptEnv<'_, '_>) -> bool {
        let left = self.operand(&condition.left, env);
        match &condition.compare {
            None => truthy(&left),
            Some((op, right)) => compare(&left, *op, &self.operand(right, env)),
        }
    }

    /// Tracks named by a `For` list: `*` or `all`, `focused`, or 1-based
    /// track numbers.
    fn track_mask(&self, list: &str, env: &ScriptEnv<'_, '_>) -> u64 {
        let engine = &*env.dispatch.engine;
        let count = engine.track_count().min(MAX_ITERATED_TRACKS);
        let text = self.expand(list, env);
        let mut mask = 0u64;
        let mut add = |track: TrackId| {
            if track.get() < count {
                mask |= 1 << track.get();
            }
        };
        for word in text.split(|c: char| c == ',' || c.is_whitespace()).filter(|w| !w.is_empty()) {
            match word.to_ascii_lowercase().as_str() {
                "*" | "all" => (0..count).map(TrackId::new).for_each(&mut add),
                "focused" => {
                    add(engine.active_track());
                    (0..count)
                        .map(TrackId::new)
                        .filter(|t| engine.is_focus_locked(*t))
                        .for_each(&mut add);
                }
                other => match other.parse::<u32>() {
                    Ok(n) if n >= 1 => add(TrackId::new(n - 1)),
                    _ => log::warn!(target: "scripts", "{}: bad track '{}'", self.current.name, word),
                },
            }
        }
        mask
    }

    fn expand<'t>(&self, text: &'t str, env: &ScriptEnv<'_, '_>) -> Cow<'t, str> {
        expand::expand(text, |r| self.resolve(r, env))
    }

    /// Expand, then take a bare variable name as a reference to its value.
    fn operand<'t>(&self, text: &'t str, env: &ScriptEnv<'_, '_>) -> Cow<'t, str> {
        let value = self.expand(text, env);
        if is_identifier(&value) {
            if let Some(resolved) = self.resolve(Reference::Named(&value), env) {
                return Cow::Owned(resolved);
            }
        }
        value
    }

    fn resolve(&self, reference: Reference<'_>, env: &ScriptEnv<'_, '_>) -> Option<String> {
        match reference {
            Reference::Positional(n) => {
                let args = self
                    .stack
                    .iter()
                    .rev()
                    .find_map(|f| match f {
                        Frame::Call { args, .. } => Some(args.as_str()),
                        _ => None,
                    })
                    .unwrap_or(self.binding_args.as_str());
                positional(args, n).map(str::to_string)
            }
            Reference::Named(name) => self
                .internal(name, env)
                .map(|v| v.to_string())
                .or_else(|| self.variable(name).map(str::to_string))
                .or_else(|| {
                    env.globals
                        .iter()
                        .find(|(n, _)| n.eq_ignore_ascii_case(name))
                        .map(|(_, v)| v.clone())
                })
                .or_else(|| {
                    env.dispatch
                        .engine
                        .get_parameter(self.track, name)
                        .map(|v| v.to_string())
                }),
        }
    }

    fn internal(&self, name: &str, env: &ScriptEnv<'_, '_>) -> Option<i64> {
        let (_, internal) = INTERNALS.iter().find(|(n, _)| n.eq_ignore_ascii_case(name))?;
        let engine = &*env.dispatch.engine;
        let value = match internal {
            Internal::SustainCount => self.sustain_count as i64,
            Internal::ClickCount => self.click_count as i64,
            Internal::TriggerValue => self.trigger_value as i64,
            Internal::TriggerNumber => trigger_number(self.trigger, self.trigger_id) as i64,
            Internal::TriggerOffset => self.trigger_offset as i64,
            Internal::ReturnCode => self.return_code as i64,
            Internal::Track => self.track.unwrap_or_else(|| engine.active_track()).number() as i64,
            Internal::TrackCount => engine.track_count() as i64,
            Internal::ActiveTrack => engine.active_track().number() as i64,
        };
        Some(value)
    }
}

fn truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

/// Numeric when both sides are integers, otherwise case-insensitive text.
fn compare(left: &str, op: CompareOp, right: &str) -> bool {
    let ordering = match (left.trim().parse::<i64>(), right.trim().parse::<i64>()) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        _ => left.to_ascii_lowercase().cmp(&right.to_ascii_lowercase()),
    };
    match op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::Ne => ordering.is_ne(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Ge => ordering.is_ge(),
    }
}
