// Shared fixtures for the pipeline integration tests
#![allow(dead_code)] // not every test binary uses every helper

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seedmap::genome::{encode_base, Genome};
use seedmap::index::GenomeIndex;
use seedmap::io::fastq::InputFile;
use seedmap::options::AlignerOptions;
use seedmap::reads::ClipPolicy;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub const TEST_SEED_LENGTH: usize = 16;

/// Deterministic random genome; the same seed always produces the same
/// sequence, which the determinism test depends on.
pub fn random_genome(seed: u64, len: usize) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let bases = ['A', 'C', 'G', 'T'];
    (0..len).map(|_| bases[rng.gen_range(0..4)]).collect()
}

pub fn revcomp(s: &str) -> String {
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

/// Build an index directory from one contig.
pub fn build_test_index(dir: &Path, name: &str, sequence: &str) {
    let genome = Genome::from_contigs(vec![(
        name.to_string(),
        sequence.bytes().map(encode_base).collect(),
    )]);
    GenomeIndex::from_genome(genome, TEST_SEED_LENGTH)
        .save(dir)
        .unwrap();
}

/// Write a FASTQ file of (id, sequence) reads with uniform quality.
pub fn write_fastq(path: &Path, reads: &[(String, String)]) {
    let mut f = File::create(path).unwrap();
    for (id, seq) in reads {
        writeln!(f, "@{}\n{}\n+\n{}", id, seq, "I".repeat(seq.len())).unwrap();
    }
}

/// Options tuned for the small test genomes: one thread, shallow seeds,
/// short minimum read length.
pub fn test_options(index_dir: &str, inputs: &[&str], paired: bool) -> AlignerOptions {
    AlignerOptions {
        index_dir: index_dir.to_string(),
        inputs: inputs.iter().map(|p| InputFile::new(*p)).collect(),
        daemon_continuation: false,
        paired,
        max_hits: 32,
        max_dist: 8,
        extra_search_depth: 2,
        num_threads: 1,
        sort_output: false,
        output_file: None,
        use_m: false,
        clipping: ClipPolicy::ClipBack,
        min_read_length: 20,
        max_secondary_alignments: usize::MAX >> 1,
        max_secondary_additional_edit_distance: None,
        perf_file: None,
        map_index: false,
        prefetch_index: false,
        num_seeds: 0,
        seed_coverage: 1.0,
        min_weight_to_check: 1,
        ignore_secondary_alignments: true,
        ignore_supplementary_alignments: true,
        read_group: None,
        strict_mapq: false,
        bind_to_processors: false,
        min_spacing: 50,
        max_spacing: 400,
        separate_mates: false,
    }
}

/// Body lines (non-header) of a SAM file.
pub fn sam_body(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| !l.starts_with('@'))
        .map(|l| l.to_string())
        .collect()
}
