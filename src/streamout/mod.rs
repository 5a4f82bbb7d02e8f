//! Software stream-out: capture surviving primitives' vertex attributes to
//! destination buffers.
//!
//! Space is reserved against each destination buffer with a cross-subgroup
//! ordered increment. The reservation result is clamped by remaining
//! capacity; the writes themselves can therefore never overflow a buffer,
//! they just silently capture fewer primitives. Reservation totals and the
//! primitives-to-write decision are published once per subgroup into the
//! stream-out control region so every lane reads the same values after a
//! barrier.

use half::f16;

use crate::config::{PipelineConfig, StreamOutBufferDesc, XfbFormat, MAX_STREAMOUT_BUFFERS};
use crate::count_stat;
use crate::fetch::VertexOutputs;
use crate::scratch::{RegionView, Scratchpad};

/// Flags accompanying an ordered reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationFlags {
    /// Serialize this increment in subgroup launch order.
    pub ordered: bool,
    /// This is the subgroup's last increment for the epoch; release it and
    /// mark the epoch done.
    pub release_done: bool,
}

/// Result of an ordered reservation.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    /// Dwords written to this buffer by all earlier contributors.
    pub prior_total: u32,
    /// True for the identified last contributor of the whole epoch.
    pub is_last_writer: bool,
}

/// Cross-subgroup ordered write counter for one destination buffer. The
/// hardware primitive serializes increments across concurrently running
/// subgroups; implementations own the counter state, callers only hold a
/// handle.
pub trait OrderedCounter {
    fn request(&self, amount: u32, flags: ReservationFlags) -> Reservation;
}

/// Destination buffer memory plus its descriptor.
pub struct StreamOutBuffer {
    pub desc: StreamOutBufferDesc,
    pub data: Vec<u32>,
}

impl StreamOutBuffer {
    pub fn new(desc: StreamOutBufferDesc) -> Self {
        Self {
            data: vec![0; desc.capacity_dwords as usize],
            desc,
        }
    }

    #[inline]
    fn store_dword(&mut self, offset: u32, value: u32) {
        self.data[offset as usize] = value;
    }

    /// Store one half into the low or high half of a dword, preserving the
    /// other half.
    #[inline]
    fn store_half(&mut self, offset: u32, high: bool, value: u16) {
        let slot = &mut self.data[offset as usize];
        if high {
            *slot = (*slot & 0x0000_ffff) | ((value as u32) << 16);
        } else {
            *slot = (*slot & 0xffff_0000) | value as u32;
        }
    }
}

/// Per-buffer outcome of the reservation phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferReservation {
    /// Dword base this subgroup writes at.
    pub write_base: u32,
    /// Primitives this subgroup will actually write to this buffer.
    pub primitives_to_write: u32,
}

/// How many primitives of `requested` fit in a buffer with `capacity`
/// dwords, `written` dwords already consumed, and `cost` dwords per
/// primitive.
#[inline]
pub fn clamp_primitives(requested: u32, capacity: u32, written: u32, cost: u32) -> u32 {
    if cost == 0 {
        return requested;
    }
    let available = capacity.saturating_sub(written);
    requested.min(available / cost)
}

/// The stream-out emulator for one subgroup.
pub struct StreamOutEmulator<'a> {
    cfg: &'a PipelineConfig,
    counters: [Option<&'a dyn OrderedCounter>; MAX_STREAMOUT_BUFFERS],
}

impl<'a> StreamOutEmulator<'a> {
    pub fn new(
        cfg: &'a PipelineConfig,
        counters: [Option<&'a dyn OrderedCounter>; MAX_STREAMOUT_BUFFERS],
    ) -> Self {
        Self { cfg, counters }
    }

    /// Indices of buffers declared in the configuration, in slot order.
    fn active_buffers(&self) -> Vec<usize> {
        (0..MAX_STREAMOUT_BUFFERS)
            .filter(|i| self.cfg.streamout_buffers[*i].is_some())
            .collect()
    }

    /// Reservation phase, executed by lane 0 on behalf of the subgroup:
    /// reserve space in every active buffer, clamp against capacity, and
    /// publish (write base, primitives to write) pairs into the control
    /// region. The caller issues the barrier that makes the pairs visible.
    ///
    /// The first active buffer uses an ordered, not-yet-done increment; all
    /// but the last use plain adds; the last is marked release+done so the
    /// final contributor of the epoch can be identified.
    pub fn reserve(
        &self,
        pad: &mut Scratchpad,
        control: RegionView,
        primitive_count: u32,
    ) -> [BufferReservation; MAX_STREAMOUT_BUFFERS] {
        let active = self.active_buffers();
        let mut reservations = [BufferReservation::default(); MAX_STREAMOUT_BUFFERS];

        let mut min_fit = primitive_count;
        for (position, &buffer) in active.iter().enumerate() {
            let (Some(desc), Some(counter)) =
                (self.cfg.streamout_buffers[buffer], self.counters[buffer])
            else {
                continue; // undeclared slots are filtered by active_buffers()
            };
            let cost = desc.vertex_stride * self.cfg.topology.vertices_per_primitive();
            let flags = ReservationFlags {
                ordered: position == 0,
                release_done: position == active.len() - 1,
            };
            let reservation = counter.request(primitive_count * cost, flags);

            let fit = clamp_primitives(
                primitive_count,
                desc.capacity_dwords,
                reservation.prior_total,
                cost,
            );
            min_fit = min_fit.min(fit);
            reservations[buffer] = BufferReservation {
                write_base: reservation.prior_total,
                primitives_to_write: fit,
            };
        }

        // A primitive is captured whole or not at all: every buffer writes
        // the same primitive count, the minimum that fits everywhere.
        for &buffer in &active {
            reservations[buffer].primitives_to_write = min_fit;
            control.write(pad, 2 * buffer as u32, reservations[buffer].write_base, 0);
            control.write(pad, 2 * buffer as u32 + 1, min_fit, 0);
        }

        count_stat!(streamout_primitives_needed, primitive_count);
        count_stat!(streamout_primitives_written, min_fit);

        reservations
    }

    /// Read the published reservation for `buffer` back from the control
    /// region (any lane, after the barrier).
    pub fn read_reservation(
        &self,
        pad: &Scratchpad,
        control: RegionView,
        buffer: usize,
        lane: u32,
    ) -> BufferReservation {
        BufferReservation {
            write_base: control.read(pad, 2 * buffer as u32, lane),
            primitives_to_write: control.read(pad, 2 * buffer as u32 + 1, lane),
        }
    }

    /// Export phase: write one captured primitive's vertices at their
    /// computed absolute offsets. `slot` is the primitive's dense compacted
    /// index; only slots below the published primitive count are written.
    pub fn export_primitive(
        &self,
        buffers: &mut [StreamOutBuffer],
        reservations: &[BufferReservation; MAX_STREAMOUT_BUFFERS],
        slot: u32,
        vertices: &[&VertexOutputs],
    ) {
        debug_assert_eq!(
            vertices.len(),
            self.cfg.topology.vertices_per_primitive() as usize
        );
        for out in &self.cfg.streamout_outputs {
            let Some(desc) = self.cfg.streamout_buffers[out.buffer] else {
                continue; // rejected by config validation
            };
            let reservation = &reservations[out.buffer];
            if slot >= reservation.primitives_to_write {
                continue;
            }
            let verts_per_prim = self.cfg.topology.vertices_per_primitive();
            for (k, vertex) in vertices.iter().enumerate() {
                let value = vertex.attribute(out.location).unwrap_or_default();
                let base = reservation.write_base
                    + (slot * verts_per_prim + k as u32) * desc.vertex_stride
                    + out.offset_in_vertex;
                write_element(&mut buffers[out.buffer], base, out.format, value);
            }
        }
    }
}

/// Write one element at `base`, formatted per its declared width. The
/// three-half shape needs a split store: one full dword then a trailing
/// 16-bit store, since no single store instruction covers it.
fn write_element(buffer: &mut StreamOutBuffer, base: u32, format: XfbFormat, value: glam::Vec4) {
    let h = |f: f32| f16::from_f32(f).to_bits();
    match format {
        XfbFormat::F32 => buffer.store_dword(base, value.x.to_bits()),
        XfbFormat::F32x2 => {
            buffer.store_dword(base, value.x.to_bits());
            buffer.store_dword(base + 1, value.y.to_bits());
        }
        XfbFormat::F32x3 => {
            buffer.store_dword(base, value.x.to_bits());
            buffer.store_dword(base + 1, value.y.to_bits());
            buffer.store_dword(base + 2, value.z.to_bits());
        }
        XfbFormat::F32x4 => {
            buffer.store_dword(base, value.x.to_bits());
            buffer.store_dword(base + 1, value.y.to_bits());
            buffer.store_dword(base + 2, value.z.to_bits());
            buffer.store_dword(base + 3, value.w.to_bits());
        }
        XfbFormat::F16x2 => {
            buffer.store_dword(base, h(value.x) as u32 | ((h(value.y) as u32) << 16));
        }
        XfbFormat::F16x3 => {
            buffer.store_dword(base, h(value.x) as u32 | ((h(value.y) as u32) << 16));
            buffer.store_half(base + 1, false, h(value.z));
        }
        XfbFormat::F16x4 => {
            buffer.store_dword(base, h(value.x) as u32 | ((h(value.y) as u32) << 16));
            buffer.store_dword(base + 1, h(value.z) as u32 | ((h(value.w) as u32) << 16));
        }
    }
}

/// Reference [`OrderedCounter`]: a per-buffer running total plus an epoch
/// contributor count. `done`-flagged requests retire one contributor; the
/// request that retires the last one reports `is_last_writer`.
pub struct EpochOrderedCounter {
    total: std::sync::atomic::AtomicU32,
    remaining_contributors: std::sync::atomic::AtomicU32,
}

impl EpochOrderedCounter {
    pub fn new(expected_contributors: u32) -> Self {
        Self {
            total: std::sync::atomic::AtomicU32::new(0),
            remaining_contributors: std::sync::atomic::AtomicU32::new(expected_contributors),
        }
    }

    pub fn total(&self) -> u32 {
        self.total.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl OrderedCounter for EpochOrderedCounter {
    fn request(&self, amount: u32, flags: ReservationFlags) -> Reservation {
        use std::sync::atomic::Ordering;
        let prior_total = self.total.fetch_add(amount, Ordering::SeqCst);
        let is_last_writer = if flags.release_done {
            self.remaining_contributors.fetch_sub(1, Ordering::SeqCst) == 1
        } else {
            false
        };
        Reservation {
            prior_total,
            is_last_writer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_never_exceeds_capacity() {
        for capacity in [0u32, 5, 12, 64] {
            for written in [0u32, 3, 12, 80] {
                for cost in [1u32, 3, 12] {
                    for requested in [0u32, 1, 7, 100] {
                        let n = clamp_primitives(requested, capacity, written, cost);
                        assert!(n <= requested);
                        assert!(
                            n * cost <= capacity.saturating_sub(written),
                            "cap={capacity} written={written} cost={cost} req={requested} -> {n}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn full_buffer_clamps_to_zero() {
        assert_eq!(clamp_primitives(10, 64, 64, 12), 0);
        assert_eq!(clamp_primitives(10, 64, 90, 12), 0, "overshoot stays zero");
    }

    #[test]
    fn epoch_counter_orders_and_identifies_last_writer() {
        let counter = EpochOrderedCounter::new(2);
        let flags_done = ReservationFlags {
            ordered: true,
            release_done: true,
        };
        let first = counter.request(24, flags_done);
        assert_eq!(first.prior_total, 0);
        assert!(!first.is_last_writer);
        let second = counter.request(12, flags_done);
        assert_eq!(second.prior_total, 24);
        assert!(second.is_last_writer, "second of two contributors is last");
        assert_eq!(counter.total(), 36);
    }

    #[test]
    fn half3_split_store_preserves_neighbor_bits() {
        let mut buffer = StreamOutBuffer::new(StreamOutBufferDesc {
            capacity_dwords: 4,
            vertex_stride: 4,
        });
        // Pre-existing data in the upper half of the trailing dword must
        // survive the 16-bit store.
        buffer.store_dword(1, 0xaaaa_0000);
        write_element(&mut buffer, 0, XfbFormat::F16x3, glam::vec4(1.0, 2.0, 3.0, 4.0));

        let h = |f: f32| f16::from_f32(f).to_bits() as u32;
        assert_eq!(buffer.data[0], h(1.0) | (h(2.0) << 16));
        assert_eq!(buffer.data[1] & 0xffff, h(3.0));
        assert_eq!(buffer.data[1] >> 16, 0xaaaa, "neighbor half clobbered");
    }
}
