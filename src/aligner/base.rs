// Single-read aligner: seed lookup, candidate clustering, bounded scoring
//
// For each read we sample seeds across the (clipped) sequence, look each
// one up in the index for both strands, cluster the resulting candidate
// locations, and score the clusters with the Landau-Vishkin kernel. The
// best cluster becomes the primary hit; everything within the secondary
// band is offered to the caller's secondary buffer.

use super::{
    AlignerConfig, AlignmentStatus, Candidate, SecondaryBuffer, SingleAlignmentResult,
};
use crate::arena::Arena;
use crate::genome::{complement, GenomeLocation};
use crate::index::SharedIndex;
use crate::mapq;
use crate::reads::{ClipPolicy, Direction, Read};

/// A candidate location with its computed edit distance.
#[derive(Debug, Clone, Copy)]
pub struct ScoredHit {
    pub location: u64,
    pub direction: Direction,
    pub score: u32,
}

pub struct BaseAligner {
    index: SharedIndex,
    config: AlignerConfig,
    clipping: ClipPolicy,
    arena: Arena,
    scored: Vec<ScoredHit>,
    lv_calls: u64,
    small_hits: u64,
}

impl BaseAligner {
    pub fn new(index: SharedIndex, config: AlignerConfig, clipping: ClipPolicy) -> BaseAligner {
        let arena = Arena::new(&config, index.seed_length());
        BaseAligner {
            index,
            config,
            clipping,
            arena,
            scored: Vec::new(),
            lv_calls: 0,
            small_hits: 0,
        }
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Cumulative dynamic-programming invocations.
    pub fn lv_calls(&self) -> u64 {
        self.lv_calls
    }

    /// Cumulative seeds that landed under the popularity cap.
    pub fn small_hits(&self) -> u64 {
        self.small_hits
    }

    pub fn bytes_reserved(&self) -> usize {
        self.arena.bytes_reserved()
    }

    /// Align one read. Secondary hits within
    /// `max_secondary_additional_edit_distance` of the best are pushed to
    /// `secondary`; overflow is clamped there.
    pub fn align_read(
        &mut self,
        read: &Read,
        secondary: &mut SecondaryBuffer,
    ) -> SingleAlignmentResult {
        if read.data_length() < self.config.min_read_length {
            return SingleAlignmentResult::not_found();
        }

        self.score_read(read);
        let best = match self.scored.iter().min_by_key(|h| h.score) {
            Some(h) => *h,
            None => return SingleAlignmentResult::not_found(),
        };
        if best.score > self.config.max_dist {
            // Only hits beyond the primary distance bound.
            return SingleAlignmentResult::not_found();
        }

        let n_best = self
            .scored
            .iter()
            .filter(|h| h.score == best.score)
            .count();
        let second_best = self
            .scored
            .iter()
            .filter(|h| h.score > best.score)
            .map(|h| h.score)
            .min();
        let mapq = mapq::compute_mapq(best.score, second_best, n_best);

        if self.config.max_secondary_alignments > 0 {
            let band = self.config.max_secondary_additional_edit_distance;
            for hit in &self.scored {
                if (hit.location, hit.direction) == (best.location, best.direction) {
                    continue;
                }
                if hit.score <= best.score + band {
                    secondary.push(SingleAlignmentResult {
                        status: AlignmentStatus::MultipleHits,
                        location: GenomeLocation(hit.location),
                        direction: hit.direction,
                        mapq: 0,
                        score: hit.score,
                    });
                }
            }
        }

        SingleAlignmentResult {
            status: if n_best > 1 {
                AlignmentStatus::MultipleHits
            } else {
                AlignmentStatus::SingleHit
            },
            location: GenomeLocation(best.location),
            direction: best.direction,
            mapq,
            score: best.score,
        }
    }

    /// All scored candidate locations for `read`, deterministic order.
    /// Used directly by the paired-end aligner to intersect mate hits.
    pub fn scored_candidates(&mut self, read: &Read) -> &[ScoredHit] {
        if read.data_length() < self.config.min_read_length {
            self.scored.clear();
            return &self.scored;
        }
        self.score_read(read);
        &self.scored
    }

    fn score_read(&mut self, read: &Read) {
        self.arena.clear();
        self.scored.clear();

        let (start, end) = read.clipped_range(self.clipping);
        let seed_len = self.index.seed_length();
        if end - start < seed_len {
            return;
        }

        for &b in &read.bases[start..end] {
            self.arena.forward.push(crate::genome::encode_base(b));
        }
        for &code in self.arena.forward.iter().rev() {
            self.arena.reverse.push(complement(code));
        }

        self.collect_candidates();
        self.dedup_candidates();

        let len = self.arena.forward.len();
        let k = self.config.search_limit() as usize;
        let min_weight = self.min_weight_in_effect();
        // Borrow dance: candidates are consumed while the window and LV
        // scratch are mutated, so iterate by index.
        for ci in 0..self.arena.candidates.len() {
            let cand = self.arena.candidates[ci];
            if cand.weight < min_weight {
                continue;
            }
            let copied = {
                let window_len = len + k;
                let genome = self.index.genome();
                genome.fill_window(cand.location, window_len, &mut self.arena.ref_window)
            };
            if copied < len.saturating_sub(k) {
                continue; // window runs off the end of the genome
            }
            let pattern = match cand.direction {
                Direction::Forward => &self.arena.forward,
                Direction::Reverse => &self.arena.reverse,
            };
            self.lv_calls += 1;
            if let Some(score) = self.arena.lv.distance(&self.arena.ref_window, pattern, k) {
                self.scored.push(ScoredHit {
                    location: cand.location,
                    direction: cand.direction,
                    score: score as u32,
                });
            }
        }

        self.cluster_scored();
    }

    fn collect_candidates(&mut self) {
        let seed_len = self.index.seed_length();
        let len = self.arena.forward.len();
        let n_seeds = self.config.seeds_for_read(len, seed_len);
        let span = len - seed_len;
        let stride = if n_seeds > 1 {
            (span / (n_seeds - 1)).max(1)
        } else {
            1
        };

        let mut offset = 0usize;
        let mut prev_offset = usize::MAX;
        for _ in 0..n_seeds {
            let off = offset.min(span);
            offset += stride;
            if off == prev_offset {
                break; // read exhausted
            }
            prev_offset = off;

            for direction in [Direction::Forward, Direction::Reverse] {
                let pattern = match direction {
                    Direction::Forward => &self.arena.forward,
                    Direction::Reverse => &self.arena.reverse,
                };
                let seed = match self.index.pack_seed(&pattern[off..off + seed_len]) {
                    Some(s) => s,
                    None => continue, // seed crosses an N
                };
                let hits = self.index.lookup(seed);
                if hits.is_empty() {
                    continue;
                }
                if hits.len() > self.config.max_hits {
                    continue; // too popular to be informative
                }
                self.small_hits += 1;
                for &h in hits {
                    let Some(location) = (h as u64).checked_sub(off as u64) else {
                        continue;
                    };
                    self.arena.candidates.push(Candidate {
                        location,
                        direction,
                        weight: 1,
                    });
                }
            }
        }
    }

    /// Collapse exact duplicate candidates (several seeds voting for the
    /// same origin), summing their weights.
    fn dedup_candidates(&mut self) {
        let cands = &mut self.arena.candidates;
        cands.sort_by_key(|c| (c.direction == Direction::Reverse, c.location));
        let mut merged: Vec<Candidate> = Vec::with_capacity(cands.len());
        for &c in cands.iter() {
            match merged.last_mut() {
                Some(last) if last.direction == c.direction && last.location == c.location => {
                    last.weight += c.weight;
                }
                _ => merged.push(c),
            }
        }
        *cands = merged;
    }

    /// Merge scored hits pointing at (nearly) the same origin: seeds on
    /// either side of an indel disagree on the start by up to the indel
    /// length, and every shifted anchor scores worse than the true one.
    /// Each cluster keeps its best-scoring member, so near-duplicates
    /// never masquerade as independent multi-hits.
    fn cluster_scored(&mut self) {
        let slop = self.config.search_limit() as u64;
        self.scored
            .sort_by_key(|h| (h.direction == Direction::Reverse, h.location, h.score));
        let mut merged: Vec<ScoredHit> = Vec::with_capacity(self.scored.len());
        for &h in &self.scored {
            match merged.last_mut() {
                Some(last)
                    if last.direction == h.direction && h.location - last.location <= slop =>
                {
                    if h.score < last.score {
                        *last = h;
                    }
                }
                _ => merged.push(h),
            }
        }
        self.scored = merged;
    }

    fn min_weight_in_effect(&self) -> u32 {
        let threshold = self.config.min_weight_to_check;
        if self
            .arena
            .candidates
            .iter()
            .any(|c| c.weight >= threshold)
        {
            threshold
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{encode_base, Genome};
    use crate::index::GenomeIndex;
    use std::sync::Arc;

    fn enc(s: &str) -> Vec<u8> {
        s.bytes().map(encode_base).collect()
    }

    fn reverse_complement(s: &str) -> String {
        s.bytes()
            .rev()
            .map(|b| match b {
                b'A' => 'T',
                b'C' => 'G',
                b'G' => 'C',
                b'T' => 'A',
                _ => 'N',
            })
            .collect()
    }

    // A 120-base reference with distinguishable halves.
    const REFERENCE: &str = "ACGTTAGCCATGGATCCGTAAGCTTGCATGCCTGCAGGTCGACTCTAGAG\
                             GATCCCCGGGTACCGAGCTCGAATTCACTGGCCGTCGTTTTACAACGTCG\
                             TGACTGGGAAAACCCTGGCG";

    fn test_index() -> SharedIndex {
        let genome = Genome::from_contigs(vec![("chr1".to_string(), enc(REFERENCE))]);
        Arc::new(GenomeIndex::from_genome(genome, 16))
    }

    fn test_config() -> AlignerConfig {
        AlignerConfig {
            max_hits: 16,
            max_dist: 6,
            extra_search_depth: 2,
            min_read_length: 24,
            ..AlignerConfig::default()
        }
    }

    fn make_read(id: &str, seq: &str) -> Read {
        Read::new(id.to_string(), seq.as_bytes().to_vec(), vec![b'I'; seq.len()])
    }

    fn aligner() -> BaseAligner {
        BaseAligner::new(test_index(), test_config(), ClipPolicy::NoClipping)
    }

    #[test]
    fn test_exact_read_aligns_at_origin() {
        let mut a = aligner();
        let read = make_read("r1", &REFERENCE[10..50]);
        let mut sec = SecondaryBuffer::new(0);
        let result = a.align_read(&read, &mut sec);
        assert_eq!(result.status, AlignmentStatus::SingleHit);
        assert_eq!(result.location, GenomeLocation(10));
        assert_eq!(result.direction, Direction::Forward);
        assert_eq!(result.score, 0);
        assert!(result.mapq > 0 && result.mapq <= 70);
    }

    #[test]
    fn test_reverse_complement_read_aligns_reverse() {
        let mut a = aligner();
        let rc = reverse_complement(&REFERENCE[20..60]);
        let read = make_read("r2", &rc);
        let mut sec = SecondaryBuffer::new(0);
        let result = a.align_read(&read, &mut sec);
        assert_eq!(result.status, AlignmentStatus::SingleHit);
        assert_eq!(result.direction, Direction::Reverse);
        assert_eq!(result.location, GenomeLocation(20));
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_mismatches_raise_score_within_bound() {
        let mut a = aligner();
        let mut seq = REFERENCE[10..50].to_string();
        // Two substitutions near the end so seeds at the front still hit.
        seq.replace_range(35..36, "C");
        seq.replace_range(38..39, "C");
        let read = make_read("r3", &seq);
        let mut sec = SecondaryBuffer::new(0);
        let result = a.align_read(&read, &mut sec);
        assert_eq!(result.location, GenomeLocation(10));
        assert!(result.score >= 1 && result.score <= 4);
        assert!(result.score <= a.config().search_limit());
    }

    #[test]
    fn test_short_read_not_found() {
        let mut a = aligner();
        let read = make_read("r4", &REFERENCE[0..10]);
        let mut sec = SecondaryBuffer::new(0);
        let result = a.align_read(&read, &mut sec);
        assert_eq!(result.status, AlignmentStatus::NotFound);
        assert_eq!(result.location, GenomeLocation::INVALID);
        assert_eq!(result.mapq, 0);
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_foreign_read_not_found() {
        let mut a = aligner();
        let read = make_read("r5", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT");
        let mut sec = SecondaryBuffer::new(0);
        let result = a.align_read(&read, &mut sec);
        assert_eq!(result.status, AlignmentStatus::NotFound);
    }

    #[test]
    fn test_lv_calls_accumulate() {
        let mut a = aligner();
        let read = make_read("r6", &REFERENCE[10..50]);
        let mut sec = SecondaryBuffer::new(0);
        a.align_read(&read, &mut sec);
        assert!(a.lv_calls() >= 1);
        assert!(a.small_hits() >= 1);
    }
}
