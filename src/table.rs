use crate::NULL_DEADLINE;
use thiserror::Error;

/// Hard ceiling on total slot count. Expansion past this is refused so that
/// every slot address fits the 31 bits the id encoding reserves for it.
pub const MAX_CAPACITY: u64 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot grow wheel to {requested} slots: capacity is limited to {limit}")]
pub struct CapacityExceeded {
    pub requested: u64,
    pub limit: u64,
}

/// Flat slot storage for a deadline wheel.
///
/// One contiguous `i64` buffer of `ticks_per_wheel × tick_allocation` cells,
/// each holding either a deadline or [`NULL_DEADLINE`]. A spoke is the run of
/// `tick_allocation` cells starting at `spoke << allocation_bits`.
///
/// This is a low-level primitive with an unsafe slot-addressed API. Caller is
/// responsible for:
/// - Ensuring `spoke < ticks_per_wheel` for all spoke-based operations
/// - Ensuring `slot < tick_allocation` for all slot-based operations
///
/// Debug assertions help catch violations during development.
pub struct SlotTable {
    slots: Box<[i64]>,
    ticks_per_wheel: usize,
    tick_mask: i64,
    tick_allocation: usize,
    allocation_bits: u32,
}

impl SlotTable {
    /// Create a table with every cell empty.
    ///
    /// Both dimensions must be powers of two; the wheel validates them before
    /// construction.
    pub fn new(ticks_per_wheel: usize, tick_allocation: usize) -> Self {
        debug_assert!(ticks_per_wheel.is_power_of_two());
        debug_assert!(tick_allocation.is_power_of_two());

        Self {
            slots: vec![NULL_DEADLINE; ticks_per_wheel * tick_allocation].into_boxed_slice(),
            ticks_per_wheel,
            tick_mask: ticks_per_wheel as i64 - 1,
            tick_allocation,
            allocation_bits: tick_allocation.trailing_zeros(),
        }
    }

    /// Spoke holding the given tick.
    #[inline(always)]
    pub fn spoke_of_tick(&self, tick: i64) -> usize {
        (tick & self.tick_mask) as usize
    }

    /// Read a slot.
    ///
    /// # Safety
    /// Caller must ensure `spoke < ticks_per_wheel` and
    /// `slot < tick_allocation`.
    #[inline(always)]
    pub unsafe fn deadline(&self, spoke: usize, slot: usize) -> i64 {
        debug_assert!(
            spoke < self.ticks_per_wheel,
            "spoke {spoke} out of bounds (ticks_per_wheel: {})",
            self.ticks_per_wheel
        );
        debug_assert!(
            slot < self.tick_allocation,
            "slot {slot} out of bounds (tick_allocation: {})",
            self.tick_allocation
        );

        // SAFETY: caller guarantees both components, so the address is within
        // the buffer.
        unsafe { *self.slots.get_unchecked((spoke << self.allocation_bits) + slot) }
    }

    /// Write a slot.
    ///
    /// # Safety
    /// Caller must ensure `spoke < ticks_per_wheel` and
    /// `slot < tick_allocation`.
    #[inline(always)]
    pub unsafe fn set_deadline(&mut self, spoke: usize, slot: usize, deadline: i64) {
        debug_assert!(
            spoke < self.ticks_per_wheel,
            "spoke {spoke} out of bounds (ticks_per_wheel: {})",
            self.ticks_per_wheel
        );
        debug_assert!(
            slot < self.tick_allocation,
            "slot {slot} out of bounds (tick_allocation: {})",
            self.tick_allocation
        );

        // SAFETY: caller guarantees both components, so the address is within
        // the buffer.
        unsafe {
            *self
                .slots
                .get_unchecked_mut((spoke << self.allocation_bits) + slot) = deadline;
        }
    }

    /// First empty slot of a spoke, scanning from offset 0.
    ///
    /// # Safety
    /// Caller must ensure `spoke < ticks_per_wheel`.
    #[inline]
    pub unsafe fn first_free_slot(&self, spoke: usize) -> Option<usize> {
        debug_assert!(
            spoke < self.ticks_per_wheel,
            "spoke {spoke} out of bounds (ticks_per_wheel: {})",
            self.ticks_per_wheel
        );

        let base = spoke << self.allocation_bits;
        for slot in 0..self.tick_allocation {
            // SAFETY: base + slot < capacity because spoke is in bounds
            if unsafe { *self.slots.get_unchecked(base + slot) } == NULL_DEADLINE {
                return Some(slot);
            }
        }

        None
    }

    /// Double the per-spoke allocation and write `deadline` into the first
    /// slot of the new half of `spoke`. Returns the slot index it landed in
    /// (the old allocation).
    ///
    /// Each spoke keeps its relative slot offsets, so every previously issued
    /// `(spoke, slot)` position still addresses the same timer afterwards.
    pub fn expand(&mut self, spoke: usize, deadline: i64) -> Result<usize, CapacityExceeded> {
        debug_assert!(spoke < self.ticks_per_wheel);

        let old_allocation = self.tick_allocation;
        let new_allocation = old_allocation * 2;
        let requested = grown_capacity(self.ticks_per_wheel, new_allocation)?;

        let new_bits = self.allocation_bits + 1;
        let mut slots = vec![NULL_DEADLINE; requested].into_boxed_slice();
        for i in 0..self.ticks_per_wheel {
            let old_base = i << self.allocation_bits;
            let new_base = i << new_bits;
            slots[new_base..new_base + old_allocation]
                .copy_from_slice(&self.slots[old_base..old_base + old_allocation]);
        }
        slots[(spoke << new_bits) + old_allocation] = deadline;

        self.slots = slots;
        self.tick_allocation = new_allocation;
        self.allocation_bits = new_bits;
        Ok(old_allocation)
    }

    /// Reset every slot to empty.
    pub fn clear(&mut self) {
        self.slots.fill(NULL_DEADLINE);
    }

    #[inline(always)]
    pub fn ticks_per_wheel(&self) -> usize {
        self.ticks_per_wheel
    }

    #[inline(always)]
    pub fn tick_allocation(&self) -> usize {
        self.tick_allocation
    }

    #[inline(always)]
    pub fn allocation_bits(&self) -> u32 {
        self.allocation_bits
    }

    /// Total number of slots.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Raw view of the slot buffer, in storage-address order.
    #[inline(always)]
    pub fn as_slice(&self) -> &[i64] {
        &self.slots
    }
}

/// Capacity after growing to `tick_allocation` slots per spoke, or an error
/// when it would pass [`MAX_CAPACITY`].
#[inline]
fn grown_capacity(
    ticks_per_wheel: usize,
    tick_allocation: usize,
) -> Result<usize, CapacityExceeded> {
    let requested = ticks_per_wheel as u64 * tick_allocation as u64;
    if requested > MAX_CAPACITY {
        return Err(CapacityExceeded {
            requested,
            limit: MAX_CAPACITY,
        });
    }

    Ok(requested as usize)
}
