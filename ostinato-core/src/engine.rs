//! The loop engine as seen from the dispatch layer.
//!
//! The engine itself (tracks, loops, audio) lives outside this crate. Actions
//! reach it through [`Engine::invoke`] and it reports back by calling
//! `LoopCore::finish_event` / `LoopCore::finish_function`.

use ostinato_types::{EventId, InterpreterId, TrackId};

use crate::action::Action;

pub trait Engine {
    fn track_count(&self) -> u32;

    fn active_track(&self) -> TrackId;

    /// Group ordinal a track belongs to, if any.
    fn track_group(&self, track: TrackId) -> Option<u32>;

    fn is_focus_locked(&self, track: TrackId) -> bool;

    /// Ordinal for a group name. The default maps a single letter to its
    /// position in the alphabet starting at 1.
    fn group_ordinal(&self, name: &str) -> Option<u32> {
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => {
                Some(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)
            }
            _ => None,
        }
    }

    /// Apply an action. `track` is None for global invocations.
    /// Returns the engine event scheduled for it, if it was deferred.
    fn invoke(&mut self, track: Option<TrackId>, action: &Action) -> Option<EventId>;

    fn get_parameter(&self, track: Option<TrackId>, name: &str) -> Option<i32>;

    fn set_parameter(&mut self, track: Option<TrackId>, name: &str, value: i32);

    /// Schedule an event `msec` in the future on a track's timeline.
    fn schedule_wait(&mut self, track: TrackId, msec: u32) -> Option<EventId>;

    /// An interpreter was reclaimed; drop any reference to it.
    fn script_finished(&mut self, _interpreter: InterpreterId) {}
}
