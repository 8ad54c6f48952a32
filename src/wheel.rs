use std::convert::Infallible;
use std::fmt;
use std::iter::FusedIterator;

use tracing::warn;

use crate::id::TimerId;
use crate::table::{CapacityExceeded, SlotTable};
use crate::{DEFAULT_TICK_ALLOCATION, NULL_DEADLINE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{name} must be a power of two, got {value}")]
pub struct NotPowerOfTwo {
    pub name: &'static str,
    pub value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot reset start time while {timer_count} timers are scheduled")]
pub struct WheelNotEmpty {
    pub timer_count: usize,
}

/// Hashed deadline timer wheel.
///
/// Deadlines are absolute `i64` times hashed into `ticks_per_wheel` spokes by
/// tick, where a tick spans `tick_resolution` time units. Each spoke holds
/// `tick_allocation` slots; a slot is one timer. The wheel never parks on a
/// clock: the caller supplies `now` to every [`poll`] and the wheel expires
/// due timers incrementally, resuming exactly where the previous call
/// stopped.
///
/// # Timing semantics
///
/// A timer with deadline `d` expires at the first poll whose `now` has
/// reached the end of the tick containing `d`. Polling once per tick
/// therefore observes a timer one tick after its deadline's tick. There is no
/// ordering guarantee among timers that share a tick.
///
/// # Ownership and concurrency
///
/// The wheel has no internal synchronization and must not be mutated from
/// more than one thread at a time. Every operation runs to completion
/// synchronously.
///
/// [`poll`]: DeadlineWheel::poll
pub struct DeadlineWheel {
    table: SlotTable,
    start_time: i64,
    tick_resolution: i64,
    resolution_bits: u32,
    current_tick: i64,
    poll_index: usize,
    timer_count: usize,
}

impl DeadlineWheel {
    /// Create a wheel with the default per-spoke allocation of
    /// [`DEFAULT_TICK_ALLOCATION`] slots.
    pub fn new(
        start_time: i64,
        tick_resolution: i64,
        ticks_per_wheel: usize,
    ) -> Result<Self, NotPowerOfTwo> {
        Self::with_allocation(
            start_time,
            tick_resolution,
            ticks_per_wheel,
            DEFAULT_TICK_ALLOCATION,
        )
    }

    /// Create a wheel with an explicit initial per-spoke allocation.
    ///
    /// `tick_resolution`, `ticks_per_wheel`, and `initial_allocation` must
    /// all be powers of two. The allocation grows by doubling whenever a
    /// spoke fills up.
    pub fn with_allocation(
        start_time: i64,
        tick_resolution: i64,
        ticks_per_wheel: usize,
        initial_allocation: usize,
    ) -> Result<Self, NotPowerOfTwo> {
        if tick_resolution < 1 || tick_resolution & (tick_resolution - 1) != 0 {
            return Err(NotPowerOfTwo {
                name: "tick_resolution",
                value: tick_resolution,
            });
        }
        if !ticks_per_wheel.is_power_of_two() {
            return Err(NotPowerOfTwo {
                name: "ticks_per_wheel",
                value: ticks_per_wheel as i64,
            });
        }
        if !initial_allocation.is_power_of_two() {
            return Err(NotPowerOfTwo {
                name: "initial_tick_allocation",
                value: initial_allocation as i64,
            });
        }

        Ok(Self {
            table: SlotTable::new(ticks_per_wheel, initial_allocation),
            start_time,
            tick_resolution,
            resolution_bits: tick_resolution.trailing_zeros(),
            current_tick: 0,
            poll_index: 0,
            timer_count: 0,
        })
    }

    /// Schedule a timer for an absolute deadline.
    ///
    /// A deadline already in the past is snapped up to the current tick so
    /// the timer stays visible to polling. The returned id addresses the
    /// timer until it is cancelled, expired, or the wheel is cleared.
    ///
    /// Fails only when the timer's spoke is full and doubling the per-spoke
    /// allocation would push the wheel past its slot-address limit.
    pub fn schedule(&mut self, deadline: i64) -> Result<TimerId, CapacityExceeded> {
        let deadline_tick = self.tick_for(deadline).max(self.current_tick);
        let spoke = self.table.spoke_of_tick(deadline_tick);

        // SAFETY: spoke comes from the tick mask, so it is in bounds.
        let slot = match unsafe { self.table.first_free_slot(spoke) } {
            Some(slot) => {
                // SAFETY: first_free_slot returned an in-bounds offset.
                unsafe { self.table.set_deadline(spoke, slot, deadline) };
                slot
            }
            None => self.table.expand(spoke, deadline)?,
        };

        self.timer_count += 1;
        Ok(TimerId::for_slot(spoke, slot))
    }

    /// Cancel a pending timer.
    ///
    /// Returns `true` when the id addressed an active timer. Unknown ids,
    /// already expired timers, and repeated cancellation all return `false`.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let Some((spoke, slot)) = self.position_of(id) else {
            return false;
        };

        // SAFETY: position_of bounds-checked both components against the
        // live dimensions.
        let deadline = unsafe { self.table.deadline(spoke, slot) };
        if deadline == NULL_DEADLINE {
            return false;
        }

        // SAFETY: same coordinates as the read above.
        unsafe { self.table.set_deadline(spoke, slot, NULL_DEADLINE) };
        self.timer_count -= 1;
        true
    }

    /// Deadline stored for a timer, or [`NULL_DEADLINE`] when the id does
    /// not address an active timer.
    pub fn deadline_of(&self, id: TimerId) -> i64 {
        match self.position_of(id) {
            // SAFETY: position_of bounds-checked both components.
            Some((spoke, slot)) => unsafe { self.table.deadline(spoke, slot) },
            None => NULL_DEADLINE,
        }
    }

    /// Expire due timers up to `now`, invoking `handler` for each.
    ///
    /// Returns the number of timers expired and consumed by this call. The
    /// wheel's cursor advances so that the next call resumes exactly where
    /// this one stopped; at most `expiry_limit` timers are consumed per call,
    /// which bounds the work done regardless of how many timers are due.
    ///
    /// The handler receives the wheel itself, so it may schedule new timers
    /// and cancel pending ones re-entrantly. Calling `clear`,
    /// `reset_start_time`, `advance`, or `poll` from inside the handler is
    /// not supported and leaves the wheel in an unspecified (memory-safe)
    /// state.
    ///
    /// # Rejection
    ///
    /// A handler returning `false` rejects the expiry: the timer is restored
    /// in place, it does not count toward the return value, and the call
    /// returns immediately. The rejected timer is offered again on the next
    /// poll that reaches its slot, starting with the very next call.
    ///
    /// # Slow polling
    ///
    /// If `now` has moved more than one full rotation past the cursor the
    /// wheel can no longer tell which spokes it owes a scan. It logs a
    /// warning, resynchronizes the cursor to `now`, and returns `0`; pending
    /// timers are not lost and fire when their spoke next comes around.
    ///
    /// # Panics
    ///
    /// A panicking handler unwinds through `poll` with its timer already
    /// consumed. A handler that wants to keep the timer on failure must
    /// catch the failure itself and return `false`.
    pub fn poll<F>(&mut self, now: i64, expiry_limit: usize, mut handler: F) -> usize
    where
        F: FnMut(&mut Self, i64, TimerId) -> bool,
    {
        let result: Result<usize, Infallible> =
            self.try_poll(now, expiry_limit, |wheel, now, id| Ok(handler(wheel, now, id)));
        match result {
            Ok(expired) => expired,
            Err(infallible) => match infallible {},
        }
    }

    /// Fallible variant of [`poll`](Self::poll).
    ///
    /// The first `Err` from the handler aborts the call and is returned
    /// unchanged. The erroring timer has already been consumed at that
    /// point, so the partial progress is permanent.
    pub fn try_poll<E, F>(
        &mut self,
        now: i64,
        expiry_limit: usize,
        mut handler: F,
    ) -> Result<usize, E>
    where
        F: FnMut(&mut Self, i64, TimerId) -> Result<bool, E>,
    {
        let target_tick = self.tick_for(now).max(self.current_tick);

        let behind = target_tick - self.current_tick;
        if behind > self.table.ticks_per_wheel() as i64 {
            warn!(
                behind,
                current_tick = self.current_tick,
                target_tick,
                "poll fell more than one rotation behind, resynchronizing tick cursor"
            );
            self.current_tick = target_tick;
            self.poll_index = 0;
            return Ok(0);
        }

        if self.timer_count == 0 {
            self.current_tick = target_tick;
            self.poll_index = 0;
            return Ok(0);
        }

        let mut expired = 0;
        loop {
            let spoke = self.table.spoke_of_tick(self.current_tick);

            // Deliberately stale across re-entrant expansion: slots a handler
            // schedules into the grown half of this spoke are picked up by a
            // later poll, not this sweep.
            let length = self.table.tick_allocation();

            let mut slot = self.poll_index;
            while slot < length {
                if expired >= expiry_limit {
                    self.poll_index = slot;
                    return Ok(expired);
                }

                // SAFETY: spoke comes from the tick mask and slot is below an
                // allocation that only ever grows.
                let deadline = unsafe { self.table.deadline(spoke, slot) };
                if now >= deadline {
                    // SAFETY: same coordinates as the read above.
                    unsafe { self.table.set_deadline(spoke, slot, NULL_DEADLINE) };
                    self.timer_count -= 1;

                    if handler(self, now, TimerId::for_slot(spoke, slot))? {
                        expired += 1;
                        self.poll_index = slot + 1;
                    } else {
                        // Rejected: put the timer back and stop. poll_index
                        // is left pointing no further than this slot, so the
                        // next poll of this spoke offers the timer again.
                        //
                        // SAFETY: expansion from inside the handler preserves
                        // (spoke, slot) addressing.
                        unsafe { self.table.set_deadline(spoke, slot, deadline) };
                        self.timer_count += 1;
                        return Ok(expired);
                    }
                }

                slot += 1;
            }

            if self.current_tick < target_tick {
                self.current_tick += 1;
                self.poll_index = 0;
                // The tick just entered is still in progress once the cursor
                // catches up to now; it is scanned by a later call.
                if self.current_tick == target_tick {
                    break;
                }
            } else {
                if self.poll_index >= self.table.tick_allocation() {
                    self.poll_index = 0;
                }
                break;
            }
        }

        Ok(expired)
    }

    /// Move the tick cursor forward to `now` without firing anything.
    ///
    /// Pending timers stay scheduled and fire when their spoke next comes
    /// around under normal polling.
    pub fn advance(&mut self, now: i64) {
        self.current_tick = self.current_tick.max(self.tick_for(now));
        self.poll_index = 0;
    }

    /// Remove every timer. The tick cursor and start time are unchanged.
    pub fn clear(&mut self) {
        self.table.clear();
        self.timer_count = 0;
    }

    /// Rebase the time axis on an empty wheel.
    ///
    /// Fails when any timer is still scheduled, because pending deadlines
    /// were placed relative to the old start time.
    pub fn reset_start_time(&mut self, start_time: i64) -> Result<(), WheelNotEmpty> {
        if self.timer_count > 0 {
            return Err(WheelNotEmpty {
                timer_count: self.timer_count,
            });
        }

        self.start_time = start_time;
        self.current_tick = 0;
        self.poll_index = 0;
        Ok(())
    }

    /// Exclusive upper bound of the tick the cursor is on.
    #[inline(always)]
    pub fn current_tick_time(&self) -> i64 {
        ((self.current_tick + 1) << self.resolution_bits) + self.start_time
    }

    #[inline(always)]
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    #[inline(always)]
    pub fn tick_resolution(&self) -> i64 {
        self.tick_resolution
    }

    #[inline(always)]
    pub fn ticks_per_wheel(&self) -> usize {
        self.table.ticks_per_wheel()
    }

    /// Current number of slots per spoke.
    #[inline(always)]
    pub fn tick_allocation(&self) -> usize {
        self.table.tick_allocation()
    }

    /// Total number of slots.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Number of scheduled timers.
    #[inline(always)]
    pub fn timer_count(&self) -> usize {
        self.timer_count
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.timer_count == 0
    }

    /// Iterate over all scheduled `(deadline, id)` pairs in storage order,
    /// without expiring anything.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            slots: self.table.as_slice(),
            allocation_bits: self.table.allocation_bits(),
            slot_mask: self.table.tick_allocation() - 1,
            address: 0,
            remaining: self.timer_count,
        }
    }

    #[inline(always)]
    fn tick_for(&self, time: i64) -> i64 {
        (time - self.start_time) >> self.resolution_bits
    }

    #[inline(always)]
    fn position_of(&self, id: TimerId) -> Option<(usize, usize)> {
        let spoke = id.spoke()?;
        let slot = id.slot();
        (spoke < self.table.ticks_per_wheel() && slot < self.table.tick_allocation())
            .then_some((spoke, slot))
    }
}

impl fmt::Debug for DeadlineWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineWheel")
            .field("start_time", &self.start_time)
            .field("tick_resolution", &self.tick_resolution)
            .field("ticks_per_wheel", &self.table.ticks_per_wheel())
            .field("tick_allocation", &self.table.tick_allocation())
            .field("current_tick", &self.current_tick)
            .field("timer_count", &self.timer_count)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a DeadlineWheel {
    type Item = (i64, TimerId);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Iterator over the scheduled `(deadline, id)` pairs of a wheel.
///
/// Borrowing the wheel keeps it immutable for the iterator's lifetime, so
/// the snapshot cannot be invalidated mid-iteration.
pub struct Iter<'a> {
    slots: &'a [i64],
    allocation_bits: u32,
    slot_mask: usize,
    address: usize,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = (i64, TimerId);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && self.address < self.slots.len() {
            let address = self.address;
            self.address += 1;

            let deadline = self.slots[address];
            if deadline != NULL_DEADLINE {
                self.remaining -= 1;
                let spoke = address >> self.allocation_bits;
                let slot = address & self.slot_mask;
                return Some((deadline, TimerId::for_slot(spoke, slot)));
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}
impl FusedIterator for Iter<'_> {}
