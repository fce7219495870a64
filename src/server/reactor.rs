//! Per-worker reactor plumbing: the timer queue and the cached date
//! header. The event loop itself lives in [`crate::server::worker`].

use crate::util;
use mio::{Registry, Token};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub type TimerId = u64;

/// What a timer means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Read-inactivity watchdog for one stream.
    StreamRead { token: Token, stream_id: u32 },
    /// Write-inactivity watchdog for one flow-blocked stream.
    StreamWrite { token: Token, stream_id: u32 },
    /// The client has not acknowledged our SETTINGS.
    SettingsAck { token: Token },
}

/// Timer queue: a min-heap of deadlines over a map of live entries.
/// Cancellation removes the map entry; stale heap nodes are skipped on
/// pop.
pub struct Timers {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    active: HashMap<TimerId, TimerKind>,
    next_id: TimerId,
}

impl Timers {
    pub fn new() -> Self {
        Timers {
            heap: BinaryHeap::new(),
            active: HashMap::new(),
            next_id: 1,
        }
    }

    /// Arm a timer `after` from now.
    pub fn arm(&mut self, kind: TimerKind, after: Duration) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(id, kind);
        self.heap.push(Reverse((Instant::now() + after, id)));
        id
    }

    /// Cancel; safe to call with an already-fired or stale id.
    pub fn cancel(&mut self, id: TimerId) {
        self.active.remove(&id);
    }

    /// Deadline of the nearest live timer.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.active.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop one due timer, skipping cancelled entries.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKind> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                return None;
            }
            self.heap.pop();
            if let Some(kind) = self.active.remove(&id) {
                return Some(kind);
            }
        }
        None
    }

    /// Drop every timer belonging to `token`'s session.
    pub fn cancel_session(&mut self, token: Token) {
        self.active.retain(|_, kind| {
            let owner = match kind {
                TimerKind::StreamRead { token, .. } => *token,
                TimerKind::StreamWrite { token, .. } => *token,
                TimerKind::SettingsAck { token } => *token,
            };
            owner != token
        });
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

/// Cached RFC 7231 date string, refreshed whenever the loop's clock
/// second advances.
pub struct DateCache {
    secs: i64,
    value: String,
}

impl DateCache {
    pub fn new() -> Self {
        DateCache {
            secs: -1,
            value: String::new(),
        }
    }

    pub fn get(&mut self) -> &str {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        if now != self.secs {
            self.secs = now;
            self.value = util::http_date(now);
        }
        &self.value
    }
}

impl Default for DateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Loop context handed into session callbacks: everything a session may
/// touch besides its own state.
pub struct LoopCtx<'a> {
    pub registry: &'a Registry,
    pub timers: &'a mut Timers,
    pub date: &'a mut DateCache,
}
