//! Interpreter frames.
//!
//! The interpreter is a hand-rolled coroutine: everything it needs to resume
//! lives on a stack of these frames. Popping a frame tells the interpreter
//! where execution continues.

use std::sync::Arc;

use ostinato_types::{EventId, KernelEventId, SymbolId, TrackId};

use super::Script;

/// What a wait frame is blocked on. The frame clears once every field is
/// cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitFrame {
    pub function: Option<SymbolId>,
    pub event: Option<EventId>,
    pub kernel: Option<KernelEventId>,
    /// Block number the `Wait block` was issued in.
    pub block: Option<u64>,
}

impl WaitFrame {
    pub fn is_satisfied(&self) -> bool {
        self.function.is_none() && self.event.is_none() && self.kernel.is_none() && self.block.is_none()
    }

    /// Release a block wait issued before `block`.
    pub fn release_block(&mut self, block: u64) {
        if self.block.is_some_and(|issued| issued < block) {
            self.block = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    Repeat { remaining: u32 },
    /// Tracks still to visit, one bit per track index.
    Tracks { remaining: u64, saved: Option<TrackId> },
}

#[derive(Debug, Clone)]
pub enum Frame {
    /// A proc call (`caller` None) or a call into another script.
    Call {
        caller: Option<Arc<Script>>,
        return_to: usize,
        args: String,
    },
    /// A proc entered by `Warp`; the script level ends when it returns.
    Warp,
    Iterator { start: usize, kind: IteratorKind },
    /// A label block entered by notification.
    Label {
        script: Arc<Script>,
        resume: Option<usize>,
    },
    Wait(WaitFrame),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Call { .. } => "call",
            Frame::Warp => "warp",
            Frame::Iterator { .. } => "iterator",
            Frame::Label { .. } => "label",
            Frame::Wait(_) => "wait",
        }
    }
}

/// Bit mask of tracks, lowest index first. Tracks beyond 63 are not
/// addressable by `For`.
pub const MAX_ITERATED_TRACKS: u32 = 64;

pub fn take_lowest(mask: &mut u64) -> Option<TrackId> {
    if *mask == 0 {
        return None;
    }
    let index = mask.trailing_zeros();
    *mask &= !(1u64 << index);
    Some(TrackId::new(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_frame_satisfaction() {
        let mut wait = WaitFrame {
            event: Some(EventId::new(1)),
            block: Some(3),
            ..Default::default()
        };
        assert!(!wait.is_satisfied());
        wait.event = None;
        assert!(!wait.is_satisfied());
        wait.release_block(3);
        assert!(!wait.is_satisfied());
        wait.release_block(4);
        assert!(wait.is_satisfied());
    }

    #[test]
    fn test_take_lowest() {
        let mut mask = 0b1010u64;
        assert_eq!(take_lowest(&mut mask), Some(TrackId::new(1)));
        assert_eq!(take_lowest(&mut mask), Some(TrackId::new(3)));
        assert_eq!(take_lowest(&mut mask), None);
    }
}
