// Alignment result model and aligner interfaces

pub mod base;
pub mod chimeric;
pub mod paired;
pub mod separate;

use crate::genome::GenomeLocation;
use crate::reads::{Direction, Read};

pub use paired::PairSecondaryBuffer;

/// Compile-time cap on the edit distance the kernels can search.
/// `max_dist + extra_search_depth` must stay below this.
pub const MAX_K: usize = 64;

pub const NUM_READS_PER_PAIR: usize = 2;

/// Outcome category for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentStatus {
    NotFound,
    SingleHit,
    MultipleHits,
    UnknownAlignment,
}

/// Best hit for one read.
#[derive(Debug, Clone, Copy)]
pub struct SingleAlignmentResult {
    pub status: AlignmentStatus,
    pub location: GenomeLocation,
    pub direction: Direction,
    pub mapq: u32,
    /// Edit distance of the reported alignment.
    pub score: u32,
}

impl SingleAlignmentResult {
    pub fn not_found() -> SingleAlignmentResult {
        SingleAlignmentResult {
            status: AlignmentStatus::NotFound,
            location: GenomeLocation::INVALID,
            direction: Direction::Forward,
            mapq: 0,
            score: 0,
        }
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.status != AlignmentStatus::NotFound && self.location.is_valid()
    }
}

/// Joint result for a mate pair: one slot per mate plus pairing evidence
/// and the diagnostic counters the pair kernel accumulates.
#[derive(Debug, Clone)]
pub struct PairedAlignmentResult {
    pub results: [SingleAlignmentResult; NUM_READS_PER_PAIR],
    /// Both mates reported as one pair record.
    pub aligned_as_pair: bool,
    /// The joint (insert-size-model) aligner produced this result.
    pub from_align_together: bool,
    pub nanos_in_align_together: u64,
    pub n_lv_calls: u64,
    pub n_small_hits: u64,
}

impl PairedAlignmentResult {
    pub fn not_found() -> PairedAlignmentResult {
        PairedAlignmentResult {
            results: [SingleAlignmentResult::not_found(); NUM_READS_PER_PAIR],
            aligned_as_pair: false,
            from_align_together: false,
            nanos_in_align_together: 0,
            n_lv_calls: 0,
            n_small_hits: 0,
        }
    }
}

/// Caller-supplied buffer for secondary alignments. Overflow is clamped
/// and recorded, never fatal: the best-hit result stays valid.
pub struct SecondaryBuffer {
    results: Vec<SingleAlignmentResult>,
    capacity: usize,
    overflowed: bool,
}

impl SecondaryBuffer {
    pub fn new(capacity: usize) -> SecondaryBuffer {
        SecondaryBuffer {
            results: Vec::with_capacity(capacity.min(4096)),
            capacity,
            overflowed: false,
        }
    }

    pub fn push(&mut self, result: SingleAlignmentResult) {
        if self.results.len() < self.capacity {
            self.results.push(result);
        } else {
            self.overflowed = true;
        }
    }

    pub fn results(&self) -> &[SingleAlignmentResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.overflowed = false;
    }
}

/// How many single-end secondary results each mate contributed to the
/// shared buffer (both mates' results pack contiguously: first read's
/// block, then the second's).
#[derive(Debug, Clone, Copy, Default)]
pub struct PairSecondaryCounts {
    pub first: usize,
    pub second: usize,
}

/// A paired-end alignment engine: one call per mate pair, producing a
/// joint result plus secondary alignments in caller-supplied buffers.
pub trait PairAlignmentEngine {
    fn align_pair(
        &mut self,
        read0: &Read,
        read1: &Read,
        pair_secondary: &mut PairSecondaryBuffer,
        single_secondary: &mut SecondaryBuffer,
    ) -> (PairedAlignmentResult, PairSecondaryCounts);

    /// Cumulative dynamic-programming invocations.
    fn lv_calls(&self) -> u64;

    /// Cumulative informative-seed lookups.
    fn small_hits(&self) -> u64;
}

/// A result MAPQ past this bound can only come from upstream corruption.
/// Log everything needed to chase it; abort only in strict mode.
pub(crate) fn verify_pair_mapq(
    engine: &str,
    result: &PairedAlignmentResult,
    read0: &Read,
    read1: &Read,
    tried: [bool; NUM_READS_PER_PAIR],
    strict: bool,
) {
    for r in 0..NUM_READS_PER_PAIR {
        if result.results[r].mapq > crate::mapq::MAPQ_SANITY_LIMIT {
            log::error!(
                "bad mapq in {}: locations ({}, {}) scores ({}, {}) mapq ({}, {}) \
                 data lengths ({}, {}) tried aligning ({}, {})",
                engine,
                result.results[0].location,
                result.results[1].location,
                result.results[0].score,
                result.results[1].score,
                result.results[0].mapq,
                result.results[1].mapq,
                read0.data_length(),
                read1.data_length(),
                tried[0] as u8,
                tried[1] as u8,
            );
            if strict {
                panic!("mapq {} exceeds sanity limit", result.results[r].mapq);
            }
        }
    }
}

/// Candidate origin location produced by seed lookup, before scoring.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub location: u64,
    pub direction: Direction,
    /// Number of seeds voting for this location.
    pub weight: u32,
}

/// Per-iteration alignment parameters, copied into every worker.
#[derive(Debug, Clone)]
pub struct AlignerConfig {
    /// Seeds with more candidate locations than this are skipped.
    pub max_hits: usize,
    /// Maximum edit distance considered for a primary hit.
    pub max_dist: u32,
    /// Additional edit distance searched beyond the best hit.
    pub extra_search_depth: u32,
    /// Reads shorter than this are unalignable.
    pub min_read_length: usize,
    /// Explicit seed count per read; 0 means derive from coverage.
    pub num_seeds: usize,
    /// Desired seed coverage (seed bases / read bases) when num_seeds is 0.
    pub seed_coverage: f64,
    /// Candidates with fewer agreeing seeds than this are only scored
    /// after the heavier ones.
    pub min_weight_to_check: u32,
    pub max_secondary_alignments: usize,
    pub max_secondary_additional_edit_distance: u32,
    /// Paired-end insert window.
    pub min_spacing: u32,
    pub max_spacing: u32,
    /// Abort instead of logging when a result carries an insane MAPQ.
    pub strict_mapq: bool,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        AlignerConfig {
            max_hits: 300,
            max_dist: 14,
            extra_search_depth: 2,
            min_read_length: 50,
            num_seeds: 0,
            seed_coverage: 1.0,
            min_weight_to_check: 1,
            max_secondary_alignments: usize::MAX >> 1,
            max_secondary_additional_edit_distance: 0,
            min_spacing: 50,
            max_spacing: 1000,
            strict_mapq: false,
        }
    }
}

impl AlignerConfig {
    /// Number of seed samples to take from a read of `read_len` bases.
    pub fn seeds_for_read(&self, read_len: usize, seed_len: usize) -> usize {
        if self.num_seeds > 0 {
            self.num_seeds
        } else {
            let by_coverage = (read_len as f64 * self.seed_coverage / seed_len as f64).ceil();
            (by_coverage as usize).max(4)
        }
    }

    /// Deepest edit distance any kernel may search.
    pub fn search_limit(&self) -> u32 {
        self.max_dist + self.extra_search_depth
    }
}
