//! Action fan-out.
//!
//! Resolves an action's scope to destination tracks and delivers it to each,
//! cloning for every destination after the first so that per-track results
//! (scheduled events) stay separate.

use ostinato_types::TrackId;

use crate::action::{Action, Scope};
use crate::engine::Engine;

/// Destination tracks as a bit mask, lowest index first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Destinations(u64);

pub const MAX_FANOUT_TRACKS: u32 = 64;

impl Destinations {
    pub fn single(track: TrackId) -> Self {
        let mut d = Self::default();
        d.insert(track);
        d
    }

    pub fn insert(&mut self, track: TrackId) {
        if track.get() < MAX_FANOUT_TRACKS {
            self.0 |= 1 << track.get();
        }
    }

    pub fn contains(&self, track: TrackId) -> bool {
        track.get() < MAX_FANOUT_TRACKS && self.0 & (1 << track.get()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(self) -> impl Iterator<Item = TrackId> {
        let mut mask = self.0;
        std::iter::from_fn(move || {
            if mask == 0 {
                return None;
            }
            let index = mask.trailing_zeros();
            mask &= !(1u64 << index);
            Some(TrackId::new(index))
        })
    }
}

/// Tracks an action applies to.
///
/// A specific track wins, then a group. Otherwise the active track, plus
/// every focus-locked track when the target honors focus lock.
pub fn destinations(action: &Action, engine: &dyn Engine) -> Destinations {
    let count = engine.track_count().min(MAX_FANOUT_TRACKS);
    let mut out = Destinations::default();
    match &action.scope {
        Scope::Track(track) => {
            if track.get() < count {
                out.insert(*track);
            } else {
                log::warn!(
                    target: "dispatch",
                    "{}: track {} out of range",
                    action.name,
                    track
                );
            }
        }
        Scope::Group(name) => match engine.group_ordinal(name) {
            Some(group) => {
                for track in (0..count).map(TrackId::new) {
                    if engine.track_group(track) == Some(group) {
                        out.insert(track);
                    }
                }
            }
            None => log::warn!(target: "dispatch", "{}: unknown group {}", action.name, name),
        },
        Scope::Active => {
            out.insert(engine.active_track());
            if action.target.is_focus_lockable() {
                for track in (0..count).map(TrackId::new) {
                    if engine.is_focus_locked(track) {
                        out.insert(track);
                    }
                }
            }
        }
    }
    out
}

/// Deliver `action` to each destination. The action itself goes to the first;
/// the rest get clones with their own transient state.
pub fn fan_out<F>(action: &mut Action, destinations: Destinations, mut deliver: F)
where
    F: FnMut(&mut Action),
{
    let mut tracks = destinations.iter();
    let Some(first) = tracks.next() else {
        return;
    };
    let template = if destinations.len() > 1 {
        Some(action.clone())
    } else {
        None
    };
    action.track = Some(first);
    deliver(action);
    if let Some(template) = template {
        for track in tracks {
            let mut copy = template.clone();
            copy.track = Some(track);
            deliver(&mut copy);
        }
    }
}
