// Independent-mate paired alignment
//
// Mate-pair libraries with huge or unknown insert distributions defeat the
// insert-size model, so this engine never attempts a joint alignment:
// each mate is aligned on its own and keeps its single-end MAPQ. The
// result still reports `aligned_as_pair` when both mates found positions,
// so downstream record structure is preserved, but `from_align_together`
// is never set.

use super::base::BaseAligner;
use super::paired::PairSecondaryBuffer;
use super::{
    verify_pair_mapq, AlignerConfig, PairAlignmentEngine, PairSecondaryCounts,
    PairedAlignmentResult, SecondaryBuffer, NUM_READS_PER_PAIR,
};
use crate::index::SharedIndex;
use crate::reads::{ClipPolicy, Read};

pub struct SeparateAligner {
    single: BaseAligner,
    min_read_length: usize,
    strict_mapq: bool,
}

impl SeparateAligner {
    pub fn new(index: SharedIndex, config: AlignerConfig, clipping: ClipPolicy) -> SeparateAligner {
        let min_read_length = config.min_read_length;
        let strict_mapq = config.strict_mapq;
        SeparateAligner {
            single: BaseAligner::new(index, config, clipping),
            min_read_length,
            strict_mapq,
        }
    }

    pub fn bytes_reserved(&self) -> usize {
        self.single.bytes_reserved()
    }
}

impl PairAlignmentEngine for SeparateAligner {
    fn align_pair(
        &mut self,
        read0: &Read,
        read1: &Read,
        _pair_secondary: &mut PairSecondaryBuffer,
        single_secondary: &mut SecondaryBuffer,
    ) -> (PairedAlignmentResult, PairSecondaryCounts) {
        let mut counts = PairSecondaryCounts::default();
        let mut result = PairedAlignmentResult::not_found();

        let long_enough = [
            read0.data_length() >= self.min_read_length,
            read1.data_length() >= self.min_read_length,
        ];
        if !long_enough[0] && !long_enough[1] {
            return (result, counts);
        }

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

        result.aligned_as_pair =
            result.results[0].is_aligned() && result.results[1].is_aligned();
        result.from_align_together = false;
        result.n_lv_calls = self.single.lv_calls() - lv_before;
        result.n_small_hits = self.single.small_hits() - small_before;

        verify_pair_mapq("separate", &result, read0, read1, tried, self.strict_mapq);
        (result, counts)
    }

    fn lv_calls(&self) -> u64 {
        self.single.lv_calls()
    }

    fn small_hits(&self) -> u64 {
        self.single.small_hits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::chimeric::ChimericAligner;
    use crate::aligner::AlignmentStatus;
    use crate::genome::{encode_base, Genome, GenomeLocation};
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

    fn synthetic_sequence(seed: u32, len: usize) -> String {
        let bases = [b'A', b'C', b'G', b'T'];
        let mut x = seed;
        let mut s = String::new();
        for _ in 0..len {
            x = x.wrapping_mul(1103515245).wrapping_add(12345);
            s.push(bases[(x >> 16) as usize % 4] as char);
        }
        s
    }

    fn make_read(id: &str, seq: &str) -> Read {
        Read::new(id.to_string(), seq.as_bytes().to_vec(), vec![b'I'; seq.len()])
    }

    fn config() -> AlignerConfig {
        AlignerConfig {
            max_hits: 16,
            max_dist: 6,
            extra_search_depth: 2,
            min_read_length: 24,
            min_spacing: 50,
            max_spacing: 160,
            ..AlignerConfig::default()
        }
    }

    fn setup() -> (SeparateAligner, String, String) {
        let chr1 = synthetic_sequence(7, 200);
        let chr2 = synthetic_sequence(99, 200);
        let genome = Genome::from_contigs(vec![
            ("chr1".to_string(), enc(&chr1)),
            ("chr2".to_string(), enc(&chr2)),
        ]);
        let index = Arc::new(GenomeIndex::from_genome(genome, 16));
        (
            SeparateAligner::new(index, config(), ClipPolicy::NoClipping),
            chr1,
            chr2,
        )
    }

    #[test]
    fn test_never_from_align_together() {
        let (mut engine, chr1, _) = setup();
        // A perfectly proper pair: even this is aligned mate by mate.
        let r0 = make_read("p/1", &chr1[20..60]);
        let r1 = make_read("p/2", &reverse_complement(&chr1[100..140]));
        let mut pair_sec = PairSecondaryBuffer::new(8);
        let mut single_sec = SecondaryBuffer::new(8);

        let (result, _) = engine.align_pair(&r0, &r1, &mut pair_sec, &mut single_sec);
        assert!(!result.from_align_together);
        assert!(result.aligned_as_pair);
        assert_eq!(result.results[0].location, GenomeLocation(20));
        assert_eq!(result.results[1].location, GenomeLocation(100));
    }

    #[test]
    fn test_mapq_matches_single_end_no_penalty() {
        let (mut engine, chr1, chr2) = setup();
        let r0 = make_read("c/1", &chr1[20..60]);
        let r1 = make_read("c/2", &reverse_complement(&chr2[100..140]));
        let mut pair_sec = PairSecondaryBuffer::new(8);
        let mut single_sec = SecondaryBuffer::new(8);

        let (result, _) = engine.align_pair(&r0, &r1, &mut pair_sec, &mut single_sec);
        assert!(result.aligned_as_pair);
        assert!(!result.from_align_together);

        // The same mates through a bare single-end aligner give the same
        // MAPQ: this engine adds no chimeric penalty.
        let genome = Genome::from_contigs(vec![
            ("chr1".to_string(), enc(&chr1)),
            ("chr2".to_string(), enc(&chr2)),
        ]);
        let index = Arc::new(GenomeIndex::from_genome(genome, 16));
        let mut bare = BaseAligner::new(index, config(), ClipPolicy::NoClipping);
        let mut sec = SecondaryBuffer::new(8);
        let solo0 = bare.align_read(&r0, &mut sec);
        let solo1 = bare.align_read(&r1, &mut sec);
        assert_eq!(result.results[0].mapq, solo0.mapq);
        assert_eq!(result.results[1].mapq, solo1.mapq);
    }

    #[test]
    fn test_one_mate_unaligned_not_a_pair() {
        let (mut engine, chr1, _) = setup();
        let r0 = make_read("u/1", &chr1[20..60]);
        let r1 = make_read("u/2", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT");
        let mut pair_sec = PairSecondaryBuffer::new(8);
        let mut single_sec = SecondaryBuffer::new(8);

        let (result, _) = engine.align_pair(&r0, &r1, &mut pair_sec, &mut single_sec);
        assert!(!result.aligned_as_pair);
        assert!(!result.from_align_together);
        assert_eq!(result.results[1].status, AlignmentStatus::NotFound);
    }

    #[test]
    fn test_matches_chimeric_fallback_for_chimeric_pair() {
        // A pair the insert model rejects takes the same per-mate path in
        // both engines; only the pair-record structure flag differs.
        let (mut engine, chr1, chr2) = setup();
        let r0 = make_read("x/1", &chr1[20..60]);
        let r1 = make_read("x/2", &reverse_complement(&chr2[100..140]));
        let mut pair_sec = PairSecondaryBuffer::new(8);
        let mut single_sec = SecondaryBuffer::new(8);
        let (sep, _) = engine.align_pair(&r0, &r1, &mut pair_sec, &mut single_sec);

        let genome = Genome::from_contigs(vec![
            ("chr1".to_string(), enc(&chr1)),
            ("chr2".to_string(), enc(&chr2)),
        ]);
        let index = Arc::new(GenomeIndex::from_genome(genome, 16));
        let mut chimeric = ChimericAligner::new(index, config(), ClipPolicy::NoClipping);
        let mut pair_sec2 = PairSecondaryBuffer::new(8);
        let mut single_sec2 = SecondaryBuffer::new(8);
        let (chi, _) = chimeric.align_pair(&r0, &r1, &mut pair_sec2, &mut single_sec2);

        for r in 0..NUM_READS_PER_PAIR {
            assert_eq!(sep.results[r].location, chi.results[r].location);
            assert_eq!(sep.results[r].mapq, chi.results[r].mapq);
        }
        assert!(sep.aligned_as_pair);
        assert!(!chi.aligned_as_pair);
    }
}
