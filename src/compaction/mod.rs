//! Dense index compaction over a per-lane predicate.
//!
//! Portable two-phase renumbering, independent of the hardware group width:
//!
//! 1. ballot the predicate into one bitmask per wave;
//! 2. each wave publishes its population count into a shared counter array
//!    (atomic adds), a barrier makes the counts visible, and every lane then
//!    combines its count-in-preceding-waves with an intra-wave exclusive
//!    prefix derived from the ballot mask.
//!
//! The result maps every kept lane injectively onto `[0, kept)`.

use crate::config::WaveSize;
use crate::scratch::{RegionView, Scratchpad};

/// Ballot `predicate` into per-wave bitmasks. Wave32 simply never sets the
/// high bits; nothing here assumes a width.
pub fn ballot(predicate: &[bool], wave_size: WaveSize) -> Vec<u64> {
    let lanes = wave_size.lanes() as usize;
    let wave_count = predicate.len().div_ceil(lanes);
    let mut masks = vec![0u64; wave_count];
    for (lane, &kept) in predicate.iter().enumerate() {
        if kept {
            masks[lane / lanes] |= 1u64 << (lane % lanes);
        }
    }
    masks
}

/// Lanes below `lane_in_wave` that are set in `mask`.
#[inline]
pub fn mask_count_below(mask: u64, lane_in_wave: u32) -> u32 {
    (mask & ((1u64 << lane_in_wave) - 1)).count_ones()
}

/// Outcome of one compaction pass.
#[derive(Debug, Clone)]
pub struct Compaction {
    /// Per original lane: dense index if the lane was kept.
    pub compacted: Vec<Option<u32>>,
    /// Number of kept lanes; the image of the map is exactly `[0, total)`.
    pub total: u32,
}

impl Compaction {
    /// Original lane index for dense slot `index`. Linear scan; the export
    /// path reads the scratch map region instead.
    pub fn uncompacted(&self, index: u32) -> Option<u32> {
        self.compacted
            .iter()
            .position(|c| *c == Some(index))
            .map(|lane| lane as u32)
    }
}

/// Compact `predicate` through the shared counter region.
///
/// `counts` must hold one slot per wave plus a trailing total slot. The two
/// scratch phases (publish counts, read prefixes) are bracketed by barriers;
/// the caller owns any barrier needed before the first write.
///
/// When `maps` is provided, the uncompacted->compacted and
/// compacted->uncompacted mappings are also stored, one dword per lane,
/// followed by a barrier so the export phase can read them.
pub fn compact(
    pad: &mut Scratchpad,
    counts: RegionView,
    maps: Option<(RegionView, RegionView)>,
    wave_size: WaveSize,
    predicate: &[bool],
) -> Compaction {
    let lanes_per_wave = wave_size.lanes();
    let masks = ballot(predicate, wave_size);
    let wave_count = masks.len() as u32;
    debug_assert!(counts.size() >= wave_count + 1, "counter region too small");

    // Phase 1: every wave publishes its population count; the trailing slot
    // accumulates the subgroup total.
    for (wave, mask) in masks.iter().enumerate() {
        let count = mask.count_ones();
        counts.atomic_add(pad, wave as u32, count);
        counts.atomic_add(pad, wave_count, count);
    }
    pad.barrier();

    // Phase 2: per-lane read-back. The prefix across preceding waves plus
    // the intra-wave prefix from the ballot mask yields the dense index.
    let mut compacted = vec![None; predicate.len()];
    for (lane, &kept) in predicate.iter().enumerate() {
        if !kept {
            continue;
        }
        let lane = lane as u32;
        let wave = lane / lanes_per_wave;
        let lane_in_wave = lane % lanes_per_wave;
        let mut preceding = 0;
        for prior in 0..wave {
            preceding += counts.read(pad, prior, lane);
        }
        let index = preceding + mask_count_below(masks[wave as usize], lane_in_wave);
        compacted[lane as usize] = Some(index);
    }
    let total = counts.read(pad, wave_count, 0);

    if let Some((forward, reverse)) = maps {
        for (lane, slot) in compacted.iter().enumerate() {
            if let Some(index) = slot {
                forward.write(pad, lane as u32, *index, lane as u32);
                reverse.write(pad, *index, lane as u32, lane as u32);
            }
        }
        pad.barrier();
    }

    Compaction { compacted, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::Scratchpad;

    fn counts_region(pad_size: u32, slots: u32) -> (Scratchpad, RegionView) {
        use crate::config::PipelineConfig;
        use crate::layout::{plan_regions, RegionMap, ScratchRegion};
        // Carve a real planned region so the view indexing is honest.
        let cfg = PipelineConfig::default();
        let mut map = RegionMap::default();
        let total = plan_regions(&cfg, Some(&mut map));
        assert!(map.size(ScratchRegion::PrimitiveCounts) >= slots);
        let pad = Scratchpad::new(total.max(pad_size));
        (pad, RegionView::new(&map, ScratchRegion::PrimitiveCounts))
    }

    #[test]
    fn ballot_sets_expected_bits() {
        let mut pred = vec![false; 40];
        pred[0] = true;
        pred[31] = true;
        pred[33] = true;
        let masks = ballot(&pred, WaveSize::W32);
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0], (1 << 0) | (1 << 31));
        assert_eq!(masks[1], 1 << 1);
    }

    #[test]
    fn mask_count_below_is_exclusive() {
        let mask = 0b1011;
        assert_eq!(mask_count_below(mask, 0), 0);
        assert_eq!(mask_count_below(mask, 1), 1);
        assert_eq!(mask_count_below(mask, 3), 2);
        assert_eq!(mask_count_below(mask, 4), 3);
    }

    #[test]
    fn compaction_is_injective_onto_prefix() {
        let (mut pad, counts) = counts_region(64, 9);
        let predicate: Vec<bool> = (0..100).map(|i| i % 3 == 0).collect();
        let result = compact(&mut pad, counts, None, WaveSize::W32, &predicate);

        let kept = predicate.iter().filter(|k| **k).count() as u32;
        assert_eq!(result.total, kept);

        let mut seen = vec![false; kept as usize];
        for (lane, slot) in result.compacted.iter().enumerate() {
            match slot {
                Some(index) => {
                    assert!(predicate[lane]);
                    assert!(*index < kept, "index {index} outside [0, {kept})");
                    assert!(!seen[*index as usize], "index {index} assigned twice");
                    seen[*index as usize] = true;
                }
                None => assert!(!predicate[lane]),
            }
        }
        assert!(seen.iter().all(|s| *s), "image must cover the whole prefix");
    }

    #[test]
    fn compaction_preserves_lane_order() {
        let (mut pad, counts) = counts_region(64, 9);
        let predicate = vec![true, false, true, true, false, true];
        let result = compact(&mut pad, counts, None, WaveSize::W32, &predicate);
        assert_eq!(result.compacted[0], Some(0));
        assert_eq!(result.compacted[2], Some(1));
        assert_eq!(result.compacted[3], Some(2));
        assert_eq!(result.compacted[5], Some(3));
    }

    #[test]
    fn empty_predicate_reports_zero() {
        let (mut pad, counts) = counts_region(64, 9);
        let predicate = vec![false; 64];
        let result = compact(&mut pad, counts, None, WaveSize::W32, &predicate);
        assert_eq!(result.total, 0);
        assert!(result.compacted.iter().all(|c| c.is_none()));
    }

    #[test]
    fn wave64_spans_the_full_mask() {
        let (mut pad, counts) = counts_region(64, 3);
        let mut predicate = vec![false; 128];
        predicate[63] = true;
        predicate[64] = true;
        let result = compact(&mut pad, counts, None, WaveSize::W64, &predicate);
        assert_eq!(result.total, 2);
        assert_eq!(result.compacted[63], Some(0));
        assert_eq!(result.compacted[64], Some(1));
    }

    #[test]
    fn uncompacted_inverts_the_map() {
        let (mut pad, counts) = counts_region(64, 9);
        let predicate = vec![false, true, false, true];
        let result = compact(&mut pad, counts, None, WaveSize::W32, &predicate);
        assert_eq!(result.uncompacted(0), Some(1));
        assert_eq!(result.uncompacted(1), Some(3));
        assert_eq!(result.uncompacted(2), None);
    }
}
