//! Action dispatch.
//!
//! [`do_action`] is the single entry point for resolved actions, whether
//! they come from a binding table, a host/UI caller or a running script.

pub mod fanout;

use crossbeam_channel::{Sender, TrySendError};
use ostinato_types::{ActivationKind, InterpreterId, KernelEventType, ResetScope, SymbolLevel, TrackId};

use crate::action::{Action, Target};
use crate::engine::Engine;
use crate::kernel::KernelPort;

pub use fanout::{destinations, fan_out, Destinations};

/// Collaborators an action may need while it is dispatched.
pub struct DispatchEnv<'a> {
    pub engine: &'a mut dyn Engine,
    pub kernel: &'a mut KernelPort,
    /// Actions implemented above the core go to the control thread.
    pub ui: &'a Sender<Action>,
}

/// Where script actions go.
///
/// The script runtime implements this directly. While a script is itself
/// running, a deferring host queues the requests until it yields.
pub trait ScriptHost {
    /// Start, notify or release a script for one destination track.
    fn run_script(&mut self, action: &Action, env: &mut DispatchEnv<'_>);

    /// Stop scripts on `track` (all tracks when None), except `author`.
    fn cancel_scripts(
        &mut self,
        author: Option<InterpreterId>,
        track: Option<TrackId>,
        env: &mut DispatchEnv<'_>,
    );
}

/// Deliver a resolved action.
///
/// Engine results (scheduled event, kernel event) are left on the action,
/// for the first destination when it fans out.
pub fn do_action(action: &mut Action, env: &mut DispatchEnv<'_>, scripts: &mut dyn ScriptHost) {
    if !action.target.is_resolved() {
        log::warn!(target: "dispatch", "ignoring unresolved action {}", action.name);
        return;
    }

    if action.level == SymbolLevel::Ui {
        match env.ui.try_send(action.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(a)) | Err(TrySendError::Disconnected(a)) => {
                log::warn!(target: "dispatch", "UI action {} dropped", a.name);
            }
        }
        return;
    }

    match action.target {
        Target::Parameter(p) if p.global => {
            action.track = None;
            action.event = env.engine.invoke(None, action);
        }
        Target::Function(_) | Target::Parameter(_) | Target::Sample => {
            let reset = action.target.reset_scope();
            let targets = destinations(action, &*env.engine);
            if targets.is_empty() {
                log::debug!(target: "dispatch", "{} has no destination", action.name);
            }
            fan_out(action, targets, |a| {
                match reset {
                    Some(ResetScope::Track) => scripts.cancel_scripts(a.interpreter, a.track, env),
                    Some(ResetScope::Global) => scripts.cancel_scripts(a.interpreter, None, env),
                    None => {}
                }
                a.event = env.engine.invoke(a.track, a);
            });
        }
        Target::Script(_) => {
            let targets = destinations(action, &*env.engine);
            fan_out(action, targets, |a| scripts.run_script(a, env));
        }
        Target::Activation(ActivationKind::Bindings) => {
            action.kernel_event = env.kernel.request(
                KernelEventType::ActivateBindings,
                &[&*action.name],
                action.request_id,
            );
        }
        Target::Activation(_) => {
            action.event = env.engine.invoke(None, action);
        }
        Target::Unresolved => {}
    }
}
