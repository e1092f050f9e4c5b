//! Kernel event channel.
//!
//! Real-time code that needs something only the control thread can do (file
//! I/O, prompts, rebuilding bindings, completion notices) fills a pooled
//! [`KernelEvent`] and sends it with [`KernelPort::send`]. The control side
//! handles it through [`KernelService`] and sends it back completed; the real-
//! time side broadcasts the completion to every interpreter and returns the
//! envelope to its free list.
//!
//! Only the control side allocates envelopes. It tops the pool up whenever the
//! shared free count drops below the low-water mark.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use ostinato_types::{KernelEventId, KernelEventType};

use crate::action::truncate;
use crate::config::KernelConfig;

/// Longest argument, in bytes.
pub const MAX_ARG_LEN: usize = 1024;
pub const ARG_COUNT: usize = 3;

#[derive(Debug)]
pub struct KernelEvent {
    pub id: KernelEventId,
    pub kind: KernelEventType,
    args: [String; ARG_COUNT],
    /// Reply written by the consumer; only meaningful for prompts.
    pub return_code: i32,
    /// Correlation id of the trigger that caused this event.
    pub request_id: u32,
}

impl KernelEvent {
    fn new() -> Self {
        Self {
            id: KernelEventId::new(0),
            kind: KernelEventType::None,
            args: std::array::from_fn(|_| String::with_capacity(MAX_ARG_LEN)),
            return_code: 0,
            request_id: 0,
        }
    }

    pub fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    /// Copy into an argument slot, truncated to [`MAX_ARG_LEN`].
    pub fn set_arg(&mut self, index: usize, value: &str) {
        if let Some(slot) = self.args.get_mut(index) {
            slot.clear();
            slot.push_str(truncate(value, MAX_ARG_LEN));
        }
    }

    fn reset(&mut self) {
        self.id = KernelEventId::new(0);
        self.kind = KernelEventType::None;
        for arg in &mut self.args {
            arg.clear();
        }
        self.return_code = 0;
        self.request_id = 0;
    }
}

/// Control-side consumer of kernel events.
pub trait KernelHandler {
    /// Handle one event. Prompt handlers write `return_code`.
    fn handle(&mut self, event: &mut KernelEvent);
}

/// Handler that only logs. Prompts are answered with 0.
#[derive(Debug, Default)]
pub struct LogKernelHandler;

impl KernelHandler for LogKernelHandler {
    fn handle(&mut self, event: &mut KernelEvent) {
        match event.kind {
            KernelEventType::Echo | KernelEventType::Message => {
                log::info!(target: "kernel", "{}", event.arg(0));
            }
            KernelEventType::Alert => {
                log::warn!(target: "kernel", "{}", event.arg(0));
            }
            KernelEventType::Prompt => {
                log::info!(target: "kernel", "prompt: {}", event.arg(0));
                event.return_code = 0;
            }
            KernelEventType::ScriptFinished => {
                log::debug!(target: "kernel", "script finished, request {}", event.request_id);
            }
            other => {
                log::debug!(
                    target: "kernel",
                    "unhandled {} ({} {} {})",
                    other.as_str(),
                    event.arg(0),
                    event.arg(1),
                    event.arg(2)
                );
            }
        }
    }
}

/// Real-time end of the channel.
pub struct KernelPort {
    free: Vec<Box<KernelEvent>>,
    to_control: Sender<Box<KernelEvent>>,
    completed: Receiver<Box<KernelEvent>>,
    replenish: Receiver<Box<KernelEvent>>,
    available: Arc<AtomicUsize>,
    next_id: u64,
}

impl KernelPort {
    /// Take an envelope from the pool. Never allocates.
    pub fn alloc(&mut self) -> Option<Box<KernelEvent>> {
        let event = match self.free.pop() {
            Some(event) => Some(event),
            None => self.replenish.try_recv().ok(),
        };
        match event {
            Some(event) => {
                self.available.fetch_sub(1, Ordering::AcqRel);
                Some(event)
            }
            None => {
                log::warn!(target: "kernel", "kernel event pool exhausted");
                None
            }
        }
    }

    /// Hand an event to the control thread. Returns its id, or None if the
    /// channel is full or gone, in which case the envelope is recycled.
    pub fn send(&mut self, mut event: Box<KernelEvent>) -> Option<KernelEventId> {
        self.next_id += 1;
        let id = KernelEventId::new(self.next_id);
        event.id = id;
        match self.to_control.try_send(event) {
            Ok(()) => Some(id),
            Err(TrySendError::Full(event)) | Err(TrySendError::Disconnected(event)) => {
                log::warn!(target: "kernel", "kernel event {} dropped", event.kind.as_str());
                self.recycle(event);
                None
            }
        }
    }

    /// Build and send an event in one step.
    pub fn request(
        &mut self,
        kind: KernelEventType,
        args: &[&str],
        request_id: u32,
    ) -> Option<KernelEventId> {
        let mut event = self.alloc()?;
        event.kind = kind;
        event.request_id = request_id;
        for (i, arg) in args.iter().take(ARG_COUNT).enumerate() {
            event.set_arg(i, arg);
        }
        self.send(event)
    }

    /// Next completed event, if any. Pass it to [`KernelPort::recycle`] once
    /// its completion has been delivered.
    pub fn poll_completed(&mut self) -> Option<Box<KernelEvent>> {
        self.completed.try_recv().ok()
    }

    pub fn recycle(&mut self, mut event: Box<KernelEvent>) {
        event.reset();
        if self.free.len() < self.free.capacity() {
            self.free.push(event);
            self.available.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Envelopes available without waiting on the control thread.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }
}

/// Control end of the channel.
pub struct KernelService {
    from_rt: Receiver<Box<KernelEvent>>,
    completed: Sender<Box<KernelEvent>>,
    replenish: Sender<Box<KernelEvent>>,
    available: Arc<AtomicUsize>,
    allocated: usize,
    pool_max: usize,
    low_water: usize,
}

impl KernelService {
    pub fn receive(&self) -> Option<Box<KernelEvent>> {
        self.from_rt.try_recv().ok()
    }

    /// Return a handled event to the real-time side.
    pub fn complete(&self, event: Box<KernelEvent>) {
        if let Err(e) = self.completed.try_send(event) {
            log::warn!(target: "kernel", "completion dropped: {}", e);
        }
    }

    /// Grow the pool back to its low-water mark, up to the hard ceiling.
    pub fn top_up(&mut self) {
        while self.available.load(Ordering::Acquire) < self.low_water
            && self.allocated < self.pool_max
        {
            if self
                .replenish
                .try_send(Box::new(KernelEvent::new()))
                .is_err()
            {
                break;
            }
            self.allocated += 1;
            self.available.fetch_add(1, Ordering::AcqRel);
            log::debug!(target: "kernel", "kernel event pool grown to {}", self.allocated);
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

/// Create both ends with `pool_size` envelopes preallocated.
pub fn channel(config: &KernelConfig) -> (KernelService, KernelPort) {
    let pool_max = config.pool_max.max(config.pool_size).max(1);
    let pool_size = config.pool_size.min(pool_max);
    let (to_control, from_rt) = crossbeam_channel::bounded(pool_max);
    let (completed_tx, completed_rx) = crossbeam_channel::bounded(pool_max);
    let (replenish_tx, replenish_rx) = crossbeam_channel::bounded(pool_max);
    let available = Arc::new(AtomicUsize::new(pool_size));

    let mut free = Vec::with_capacity(pool_max);
    free.extend((0..pool_size).map(|_| Box::new(KernelEvent::new())));

    let service = KernelService {
        from_rt,
        completed: completed_tx,
        replenish: replenish_tx,
        available: available.clone(),
        allocated: pool_size,
        pool_max,
        low_water: config.low_water.min(pool_max),
    };
    let port = KernelPort {
        free,
        to_control,
        completed: completed_rx,
        replenish: replenish_rx,
        available,
        next_id: 0,
    };
    (service, port)
}
