//! One-shot pulse scheduler.
//!
//! Peripherals express "call me back in N ticks" as a pulse request.
//! Requests are one-shot and re-armable: firing or expiring a request
//! frees its slot, and scheduling again returns a fresh handle.
//!
//! Handles are generational: an expired or already-fired handle is
//! simply stale, and `expire()` on a stale handle is a harmless no-op.
//! This is what makes teardown paths safe — a peripheral can always
//! expire whatever handle it holds without tracking liveness itself.
//!
//! Two pulses due on the same tick fire in registration order.

use crate::ticks::micros_to_ticks;

/// Handle to a scheduled pulse. `Copy`, cheap, and safe to hold stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseReq {
    slot: u32,
    generation: u32,
}

impl PulseReq {
    /// A handle that refers to nothing.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            slot: u32::MAX,
            generation: 0,
        }
    }

    #[must_use]
    pub fn is_idle(self) -> bool {
        self.slot == u32::MAX
    }
}

impl Default for PulseReq {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug, Clone)]
struct Slot<E> {
    generation: u32,
    armed: bool,
    due: u64,
    seq: u64,
    event: E,
}

/// The pulse scheduler.
///
/// `E` is the event token delivered back to the machine when a pulse
/// fires; the machine routes it to the owning peripheral. Tokens rather
/// than closures keep the scheduler serializable and the ownership
/// graph acyclic.
#[derive(Debug, Default)]
pub struct PulseScheduler<E: Copy> {
    slots: Vec<Slot<E>>,
    next_seq: u64,
}

impl<E: Copy> PulseScheduler<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_seq: 0,
        }
    }

    /// Schedule `event` to fire `delay` ticks after `now`.
    pub fn schedule_ticks(&mut self, now: u64, delay: u64, event: E) -> PulseReq {
        let due = now + delay;
        let seq = self.next_seq;
        self.next_seq += 1;

        // Reuse a free slot if one exists; the generation bump
        // invalidates any stale handle still pointing at it.
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.armed {
                slot.generation = slot.generation.wrapping_add(1);
                slot.armed = true;
                slot.due = due;
                slot.seq = seq;
                slot.event = event;
                return PulseReq {
                    slot: i as u32,
                    generation: slot.generation,
                };
            }
        }

        self.slots.push(Slot {
            generation: 0,
            armed: true,
            due,
            seq,
            event,
        });
        PulseReq {
            slot: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    /// Schedule `event` to fire `micros` microseconds after `now`.
    pub fn schedule_micros(&mut self, now: u64, micros: u64, event: E) -> PulseReq {
        self.schedule_ticks(now, micros_to_ticks(micros), event)
    }

    /// Cancel a pulse. Guaranteed not to fire afterwards. No-op on idle
    /// or stale handles.
    pub fn expire(&mut self, req: PulseReq) {
        if let Some(slot) = self.slot_for(req) {
            self.slots[slot].armed = false;
        }
    }

    /// Whether the handle refers to a still-armed pulse.
    #[must_use]
    pub fn is_armed(&self, req: PulseReq) -> bool {
        self.slot_for(req).is_some()
    }

    /// Ticks until the pulse fires, or `None` for idle/stale handles.
    /// An overdue pulse reports zero.
    #[must_use]
    pub fn remaining(&self, req: PulseReq, now: u64) -> Option<u64> {
        self.slot_for(req)
            .map(|i| self.slots[i].due.saturating_sub(now))
    }

    /// Earliest armed deadline, if any.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.slots
            .iter()
            .filter(|s| s.armed)
            .map(|s| s.due)
            .min()
    }

    /// Fire the earliest pulse with `due <= now`, breaking deadline ties
    /// by registration order. Returns `None` when nothing is due.
    pub fn pop_due(&mut self, now: u64) -> Option<E> {
        let mut best: Option<usize> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if !slot.armed || slot.due > now {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) => {
                    let cur = &self.slots[b];
                    if (slot.due, slot.seq) < (cur.due, cur.seq) {
                        best = Some(i);
                    }
                }
            }
        }
        let i = best?;
        self.slots[i].armed = false;
        Some(self.slots[i].event)
    }

    /// Number of armed pulses.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.armed).count()
    }

    fn slot_for(&self, req: PulseReq) -> Option<usize> {
        if req.is_idle() {
            return None;
        }
        let i = req.slot as usize;
        let slot = self.slots.get(i)?;
        (slot.armed && slot.generation == req.generation).then_some(i)
    }
}
