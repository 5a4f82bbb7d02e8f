//! Subgroup scratchpad emulation.
//!
//! All cross-lane communication in a subgroup goes through this dword-
//! addressed memory. Hardware brackets every producer/consumer hand-off with
//! a release fence, a full-group barrier, and an acquire fence; the emulator
//! collapses that sequence into a single [`Scratchpad::barrier`] call that
//! bumps an epoch counter. A lane reading a dword that a *different* lane
//! wrote in the same epoch has skipped a barrier; that contract is policed
//! with debug assertions, matching the stage's "asserted, never surfaced at
//! lane level" error stance.
//!
//! Atomic slots are exempt from the policing: read-modify-write traffic
//! within one epoch is exactly what atomics are for.

use crate::layout::{RegionMap, ScratchRegion};

/// Sentinel meaning "no lane", used for epoch bookkeeping.
const NO_LANE: u32 = u32::MAX;

/// Emulated low-latency shared memory for one subgroup.
pub struct Scratchpad {
    data: Vec<u32>,
    epoch: u32,
    // (epoch, lane) of the last non-atomic write per dword.
    last_write: Vec<(u32, u32)>,
}

impl Scratchpad {
    pub fn new(size_in_dwords: u32) -> Self {
        let n = size_in_dwords as usize;
        Self {
            data: vec![0; n],
            epoch: 0,
            last_write: vec![(0, NO_LANE); n],
        }
    }

    #[inline]
    pub fn size_in_dwords(&self) -> u32 {
        self.data.len() as u32
    }

    /// Release + full-group barrier + acquire, as one operation.
    #[inline]
    pub fn barrier(&mut self) {
        self.epoch += 1;
    }

    /// Plain store by `lane`.
    #[inline]
    pub fn write(&mut self, addr: u32, value: u32, lane: u32) {
        let i = addr as usize;
        self.data[i] = value;
        self.last_write[i] = (self.epoch, lane);
    }

    /// Plain load by `lane`. Reading another lane's same-epoch write means a
    /// barrier was skipped.
    #[inline]
    pub fn read(&self, addr: u32, lane: u32) -> u32 {
        let i = addr as usize;
        let (write_epoch, writer) = self.last_write[i];
        debug_assert!(
            writer == NO_LANE || writer == lane || write_epoch < self.epoch,
            "lane {lane} read dword {addr} written by lane {writer} in the current epoch"
        );
        self.data[i]
    }

    /// Atomic add; returns the prior value. Exempt from epoch policing.
    #[inline]
    pub fn atomic_add(&mut self, addr: u32, amount: u32) -> u32 {
        let i = addr as usize;
        let prior = self.data[i];
        self.data[i] = prior.wrapping_add(amount);
        prior
    }

    /// Atomic bitwise OR; returns the prior value. Exempt from epoch
    /// policing.
    #[inline]
    pub fn atomic_or(&mut self, addr: u32, bits: u32) -> u32 {
        let i = addr as usize;
        let prior = self.data[i];
        self.data[i] = prior | bits;
        prior
    }
}

/// A planned region bound to a scratchpad: all indexing below goes through
/// the planner's offsets, never raw addresses.
#[derive(Clone, Copy)]
pub struct RegionView {
    offset: u32,
    size: u32,
}

impl RegionView {
    pub fn new(map: &RegionMap, region: ScratchRegion) -> Self {
        Self {
            offset: map.offset(region),
            size: map.size(region),
        }
    }

    #[inline]
    pub fn addr(&self, index: u32) -> u32 {
        debug_assert!(index < self.size, "region index {index} out of {}", self.size);
        self.offset + index
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn write(&self, pad: &mut Scratchpad, index: u32, value: u32, lane: u32) {
        pad.write(self.addr(index), value, lane);
    }

    #[inline]
    pub fn read(&self, pad: &Scratchpad, index: u32, lane: u32) -> u32 {
        pad.read(self.addr(index), lane)
    }

    #[inline]
    pub fn atomic_add(&self, pad: &mut Scratchpad, index: u32, amount: u32) -> u32 {
        pad.atomic_add(self.addr(index), amount)
    }

    #[inline]
    pub fn atomic_or(&self, pad: &mut Scratchpad, index: u32, bits: u32) -> u32 {
        pad.atomic_or(self.addr(index), bits)
    }
}
