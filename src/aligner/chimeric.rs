// Paired alignment with single-end fallback
//
// The joint aligner handles well-behaved pairs; mates that it cannot place
// together (chimeric fragments, structural variants, one unmappable mate)
// fall back to independent single-end alignment with no MAPQ penalty.

use super::base::BaseAligner;
use super::paired::{InsertSizePairedAligner, PairSecondaryBuffer};
use super::{
    verify_pair_mapq, AlignerConfig, PairAlignmentEngine, PairSecondaryCounts,
    PairedAlignmentResult, SecondaryBuffer, NUM_READS_PER_PAIR,
};
use crate::index::SharedIndex;
use crate::reads::{ClipPolicy, Read};

pub struct ChimericAligner {
    single: BaseAligner,
    joint: InsertSizePairedAligner,
    min_read_length: usize,
    strict_mapq: bool,
}

impl ChimericAligner {
    pub fn new(index: SharedIndex, config: AlignerConfig, clipping: ClipPolicy) -> ChimericAligner {
        let min_read_length = config.min_read_length;
        let strict_mapq = config.strict_mapq;
        ChimericAligner {
            single: BaseAligner::new(index, config.clone(), clipping),
            joint: InsertSizePairedAligner::new(config),
            min_read_length,
            strict_mapq,
        }
    }

    pub fn bytes_reserved(&self) -> usize {
        self.single.bytes_reserved()
    }
}

impl PairAlignmentEngine for ChimericAligner {
    fn align_pair(
        &mut self,
        read0: &Read,
        read1: &Read,
        pair_secondary: &mut PairSecondaryBuffer,
        single_secondary: &mut SecondaryBuffer,
    ) -> (PairedAlignmentResult, PairSecondaryCounts) {
        let mut counts = PairSecondaryCounts::default();

        let long_enough = [
            read0.data_length() >= self.min_read_length,
            read1.data_length() >= self.min_read_length,
        ];
        if !long_enough[0] && !long_enough[1] {
            return (PairedAlignmentResult::not_found(), counts);
        }

        // Joint attempt needs both mates.
        let mut joint_nanos = 0;
        if long_enough[0] && long_enough[1] {
            let result = self
                .joint
                .align_together(&mut self.single, read0, read1, pair_secondary);
            if result.from_align_together {
                verify_pair_mapq("chimeric", &result, read0, read1, [true, true], self.strict_mapq);
                return (result, counts);
            }
            joint_nanos = result.nanos_in_align_together;
        }

        // Chimeric or unmappable pair: each mate on its own. Secondary
        // results pack contiguously, first read's block then the second's.
        let mut result = PairedAlignmentResult::not_found();
        result.nanos_in_align_together = joint_nanos;
        let lv_before = self.single.lv_calls();
        let small_before = self.single.small_hits();
        let reads = [read0, read1];
        let mut tried = [false; NUM_READS_PER_PAIR];
        for r in 0..NUM_READS_PER_PAIR {
            if !long_enough[r] {
                continue;
            }
            tried[r] = true;
            let before = single_secondary.len();
            result.results[r] = self.single.align_read(reads[r], single_secondary);
            let added = single_secondary.len() - before;
            if r == 0 {
                counts.first = added;
            } else {
                counts.second = added;
            }
        }
        result.aligned_as_pair = false;
        result.from_align_together = false;
        result.n_lv_calls = self.single.lv_calls() - lv_before;
        result.n_small_hits = self.single.small_hits() - small_before;

        verify_pair_mapq("chimeric", &result, read0, read1, tried, self.strict_mapq);
        (result, counts)
    }

    fn lv_calls(&self) -> u64 {
        self.single.lv_calls()
    }

    fn small_hits(&self) -> u64 {
        self.single.small_hits()
    }
}
