// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The idle and hard timeout wheel of a flow table.
//!
//! A ring of `slots` buckets, each `slot_ms` wide. Every slot carries
//! the deadline it currently stands for; once that deadline passes the
//! sweep empties the slot and moves its deadline one full revolution
//! ahead. The wheel itself knows nothing about entries beyond their
//! handles: it hands fired timers back to the table, which decides
//! what expiry means.

use super::arena::EntryHandle;
use crate::api::TimerConfig;
use crate::ddi::time::MILLIS;
use crate::ddi::time::Moment;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TimerKind {
    Idle,
    Hard,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timer {
    pub handle: EntryHandle,
    pub kind: TimerKind,
    /// Deadline in milliseconds since the wheel's base.
    expires_ms: u64,
}

#[derive(Debug)]
struct Slot {
    timeout_ms: u64,
    timers: Vec<Timer>,
}

/// Where an entry's timers currently sit.
#[derive(Clone, Copy, Debug, Default)]
struct Armed {
    idle: Option<usize>,
    hard: Option<usize>,
}

impl Armed {
    fn pos_mut(&mut self, kind: TimerKind) -> &mut Option<usize> {
        match kind {
            TimerKind::Idle => &mut self.idle,
            TimerKind::Hard => &mut self.hard,
        }
    }

    fn is_empty(&self) -> bool {
        self.idle.is_none() && self.hard.is_none()
    }
}

#[derive(Debug)]
pub struct TimerWheel {
    base: Moment,
    slot_ms: u64,
    slots: Vec<Slot>,
    current: usize,
    armed: HashMap<EntryHandle, Armed>,
}

impl TimerWheel {
    pub fn new(cfg: &TimerConfig, now: Moment) -> Self {
        let slot_ms = cfg.slot_ms.max(1);
        let n = cfg.slots.max(1) as u64;
        let slots = (0..n)
            .map(|i| Slot { timeout_ms: slot_ms * (i + 1), timers: Vec::new() })
            .collect();

        Self { base: now, slot_ms, slots, current: 0, armed: HashMap::new() }
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// The number of armed timers.
    pub fn len(&self) -> usize {
        self.armed
            .values()
            .map(|a| usize::from(a.idle.is_some()) + usize::from(a.hard.is_some()))
            .sum()
    }

    pub fn is_armed(&self, handle: EntryHandle, kind: TimerKind) -> bool {
        self.armed.get(&handle).is_some_and(|a| match kind {
            TimerKind::Idle => a.idle.is_some(),
            TimerKind::Hard => a.hard.is_some(),
        })
    }

    fn now_ms(&self, now: Moment) -> u64 {
        now.delta_as_millis(self.base)
    }

    fn place(&mut self, timer: Timer) -> usize {
        let n = self.slots.len();
        let cur_timeout = self.slots[self.current].timeout_ms;
        let offset = (timer.expires_ms.saturating_sub(cur_timeout)
            / self.slot_ms) as usize;
        // A deadline beyond the ring lands in the furthest slot and is
        // placed again when that slot fires.
        let pos = (self.current + offset.min(n - 1)) % n;
        self.slots[pos].timers.push(timer);
        pos
    }

    /// Arm a timer of `kind` for `handle`, firing `secs` seconds after
    /// `now` rounded up to the next slot boundary. An already armed
    /// timer of the same kind is replaced.
    pub fn arm(
        &mut self,
        handle: EntryHandle,
        kind: TimerKind,
        secs: u32,
        now: Moment,
    ) {
        self.disarm(handle, kind);

        let deadline = self.now_ms(now) + u64::from(secs) * MILLIS;
        let expires_ms = deadline.div_ceil(self.slot_ms) * self.slot_ms;
        let pos = self.place(Timer { handle, kind, expires_ms });
        *self.armed.entry(handle).or_default().pos_mut(kind) = Some(pos);
    }

    fn disarm(&mut self, handle: EntryHandle, kind: TimerKind) {
        let Some(armed) = self.armed.get_mut(&handle) else {
            return;
        };

        if let Some(pos) = armed.pos_mut(kind).take() {
            self.slots[pos]
                .timers
                .retain(|t| !(t.handle == handle && t.kind == kind));
        }

        if armed.is_empty() {
            self.armed.remove(&handle);
        }
    }

    /// Drop every timer of `handle`.
    pub fn cancel(&mut self, handle: EntryHandle) {
        self.disarm(handle, TimerKind::Idle);
        self.disarm(handle, TimerKind::Hard);
    }

    /// Sweep every slot whose deadline has passed at `now` and return
    /// the timers that fired, in deadline order. Fired timers are no
    /// longer armed.
    pub fn advance(&mut self, now: Moment) -> Vec<Timer> {
        let now_ms = self.now_ms(now);
        let revolution = self.slot_ms * self.slots.len() as u64;
        let mut fired = Vec::new();

        while self.slots[self.current].timeout_ms <= now_ms {
            let slot = &mut self.slots[self.current];
            let timers = core::mem::take(&mut slot.timers);
            slot.timeout_ms += revolution;
            self.current = (self.current + 1) % self.slots.len();

            for t in timers {
                if t.expires_ms > now_ms {
                    let pos = self.place(t);
                    if let Some(a) = self.armed.get_mut(&t.handle) {
                        *a.pos_mut(t.kind) = Some(pos);
                    }
                    continue;
                }

                if let Some(a) = self.armed.get_mut(&t.handle) {
                    *a.pos_mut(t.kind) = None;
                    if a.is_empty() {
                        self.armed.remove(&t.handle);
                    }
                }
                fired.push(t);
            }
        }

        fired
    }
}
