// Joint paired-end alignment using the insert-size model
//
// Both mates' candidate hits are enumerated independently, then intersected
// under the library's insert window: opposite strands, outer distance
// within [min_spacing, max_spacing]. The pair with the lowest combined
// edit distance wins; the runner-up pair sets the pair MAPQ. When no
// combination satisfies the model the caller falls back to independent
// single-end alignment (the chimeric path).

use super::base::{BaseAligner, ScoredHit};
use super::{
    AlignerConfig, AlignmentStatus, PairedAlignmentResult, SingleAlignmentResult,
    NUM_READS_PER_PAIR,
};
use crate::genome::GenomeLocation;
use crate::mapq;
use crate::reads::{Direction, Read};
use std::time::Instant;

/// Caller-supplied buffer for suboptimal pair results. Overflow is
/// clamped and surfaced through `overflowed`, never fatal.
pub struct PairSecondaryBuffer {
    results: Vec<PairedAlignmentResult>,
    capacity: usize,
    overflowed: bool,
}

impl PairSecondaryBuffer {
    pub fn new(capacity: usize) -> PairSecondaryBuffer {
        PairSecondaryBuffer {
            results: Vec::with_capacity(capacity.min(1024)),
            capacity,
            overflowed: false,
        }
    }

    pub fn push(&mut self, result: PairedAlignmentResult) {
        if self.results.len() < self.capacity {
            self.results.push(result);
        } else {
            self.overflowed = true;
        }
    }

    pub fn results(&self) -> &[PairedAlignmentResult] {
        &self.results
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.overflowed = false;
    }
}

struct PairCombo {
    hit: [ScoredHit; NUM_READS_PER_PAIR],
    score: u32,
}

/// The insert-size-model pair aligner. Candidate enumeration is borrowed
/// from the worker's single aligner at call time; this struct only owns
/// the pairing scratch.
pub struct InsertSizePairedAligner {
    config: AlignerConfig,
    hits: [Vec<ScoredHit>; NUM_READS_PER_PAIR],
    combos: Vec<PairCombo>,
}

impl InsertSizePairedAligner {
    pub fn new(config: AlignerConfig) -> InsertSizePairedAligner {
        InsertSizePairedAligner {
            config,
            hits: [Vec::new(), Vec::new()],
            combos: Vec::new(),
        }
    }

    /// Attempt a joint alignment. The result has `from_align_together =
    /// true` only when some pair satisfied the insert model with both
    /// mates within the primary distance bound.
    pub fn align_together(
        &mut self,
        single: &mut BaseAligner,
        read0: &Read,
        read1: &Read,
        pair_secondary: &mut PairSecondaryBuffer,
    ) -> PairedAlignmentResult {
        let start = Instant::now();
        let lv_before = single.lv_calls();
        let small_before = single.small_hits();

        for (slot, read) in [read0, read1].into_iter().enumerate() {
            self.hits[slot].clear();
            self.hits[slot].extend_from_slice(single.scored_candidates(read));
        }

        self.combos.clear();
        for &h0 in &self.hits[0] {
            for &h1 in &self.hits[1] {
                if !self.pair_fits(&h0, &h1) {
                    continue;
                }
                self.combos.push(PairCombo {
                    hit: [h0, h1],
                    score: h0.score + h1.score,
                });
            }
        }

        let mut result = PairedAlignmentResult::not_found();
        result.nanos_in_align_together = start.elapsed().as_nanos() as u64;
        result.n_lv_calls = single.lv_calls() - lv_before;
        result.n_small_hits = single.small_hits() - small_before;

        let Some(best_idx) = self
            .combos
            .iter()
            .enumerate()
            .min_by_key(|(i, c)| (c.score, combo_key(c), *i))
            .map(|(i, _)| i)
        else {
            return result;
        };
        let best_score = self.combos[best_idx].score;
        let n_best = self.combos.iter().filter(|c| c.score == best_score).count();
        let second_best = self
            .combos
            .iter()
            .filter(|c| c.score > best_score)
            .map(|c| c.score)
            .min();
        let pair_mapq = mapq::compute_mapq(best_score, second_best, n_best);

        let best = &self.combos[best_idx];
        for r in 0..NUM_READS_PER_PAIR {
            result.results[r] = SingleAlignmentResult {
                status: if n_best > 1 {
                    AlignmentStatus::MultipleHits
                } else {
                    AlignmentStatus::SingleHit
                },
                location: GenomeLocation(best.hit[r].location),
                direction: best.hit[r].direction,
                mapq: pair_mapq,
                score: best.hit[r].score,
            };
        }
        result.aligned_as_pair = true;
        result.from_align_together = true;
        result.nanos_in_align_together = start.elapsed().as_nanos() as u64;

        // Suboptimal pairs within the secondary band.
        let band = self.config.max_secondary_additional_edit_distance;
        for (i, combo) in self.combos.iter().enumerate() {
            if self.config.max_secondary_alignments == 0 {
                break;
            }
            if i == best_idx || combo.score > best_score + band {
                continue;
            }
            let mut sec = PairedAlignmentResult::not_found();
            for r in 0..NUM_READS_PER_PAIR {
                sec.results[r] = SingleAlignmentResult {
                    status: AlignmentStatus::MultipleHits,
                    location: GenomeLocation(combo.hit[r].location),
                    direction: combo.hit[r].direction,
                    mapq: 0,
                    score: combo.hit[r].score,
                };
            }
            sec.aligned_as_pair = true;
            sec.from_align_together = true;
            pair_secondary.push(sec);
        }

        result
    }

    /// Insert-size model: opposite strands, the forward mate upstream,
    /// outer distance inside the configured window, both mates within the
    /// primary distance bound.
    fn pair_fits(&self, h0: &ScoredHit, h1: &ScoredHit) -> bool {
        if h0.direction == h1.direction {
            return false;
        }
        if h0.score > self.config.max_dist || h1.score > self.config.max_dist {
            return false;
        }
        let (fwd, rev) = if h0.direction == Direction::Forward {
            (h0, h1)
        } else {
            (h1, h0)
        };
        if rev.location < fwd.location {
            return false;
        }
        let spacing = rev.location - fwd.location;
        spacing >= self.config.min_spacing as u64 && spacing <= self.config.max_spacing as u64
    }
}

fn combo_key(c: &PairCombo) -> (u64, u64) {
    (c.hit[0].location, c.hit[1].location)
}
