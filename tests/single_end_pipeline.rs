// End-to-end single-end pipeline tests: index on disk, FASTQ in, SAM/BAM
// out, statistics checked against the known composition of the input.

mod common;

use common::*;
use seedmap::context::AlignerContext;
use tempfile::TempDir;

const GENOME_LEN: usize = 4000;

struct Fixture {
    _dir: TempDir,
    index_dir: String,
    genome: String,
    fastq: std::path::PathBuf,
    out: std::path::PathBuf,
}

/// Genome plus `n_mapped` exact 60bp reads and `n_junk` unalignable ones.
fn fixture(name: &str, seed: u64, n_mapped: usize, n_junk: usize) -> Fixture {
    let dir = TempDir::with_prefix(name).unwrap();
    let genome = random_genome(seed, GENOME_LEN);
    let index_dir = dir.path().join("index");
    build_test_index(&index_dir, "chr1", &genome);

    let mut reads = Vec::new();
    for i in 0..n_mapped {
        let start = (i * 37) % (GENOME_LEN - 60);
        reads.push((format!("read{}", i), genome[start..start + 60].to_string()));
    }
    for j in 0..n_junk {
        // Poly-A never occurs in a random genome long enough to seed.
        reads.push((format!("junk{}", j), "A".repeat(60)));
    }
    let fastq = dir.path().join("reads.fq");
    write_fastq(&fastq, &reads);

    Fixture {
        index_dir: index_dir.to_string_lossy().into_owned(),
        genome,
        fastq,
        out: dir.path().join("out.sam"),
        _dir: dir,
    }
}

#[test]
fn test_exact_reads_align_to_their_origins() {
    let fx = fixture("seedmap_se_exact", 11, 20, 0);
    let mut options = test_options(
        &fx.index_dir,
        &[fx.fastq.to_str().unwrap()],
        false,
    );
    options.output_file = Some(fx.out.to_string_lossy().into_owned());

    let mut context = AlignerContext::new(options, None);
    context.run().unwrap();

    let stats = context.stats();
    assert_eq!(stats.total_reads, 20);
    assert_eq!(stats.useful_reads, 20);
    assert_eq!(stats.not_found, 0);
    assert_eq!(stats.single_hits + stats.multi_hits, 20);

    let text = std::fs::read_to_string(&fx.out).unwrap();
    assert!(text.starts_with("@HD"));
    assert!(text.contains("@SQ\tSN:chr1\tLN:4000"));
    let body = sam_body(&text);
    assert_eq!(body.len(), 20);
    for line in &body {
        let fields: Vec<&str> = line.split('\t').collect();
        let name = fields[0];
        let pos: usize = fields[3].parse().unwrap();
        let i: usize = name.trim_start_matches("read").parse().unwrap();
        assert_eq!(pos, (i * 37) % (GENOME_LEN - 60) + 1, "read {}", name);
        assert_eq!(fields[5], "60=");
        assert!(line.contains("NM:i:0"));
    }
}

#[test]
fn test_too_short_read_is_not_found() {
    let fx = fixture("seedmap_se_short", 13, 0, 0);
    let short = fx.genome[100..110].to_string();
    write_fastq(&fx.fastq, &[("tiny".to_string(), short)]);

    let mut options = test_options(&fx.index_dir, &[fx.fastq.to_str().unwrap()], false);
    options.output_file = Some(fx.out.to_string_lossy().into_owned());

    let mut context = AlignerContext::new(options, None);
    context.run().unwrap();

    let stats = context.stats();
    assert_eq!(stats.total_reads, 1);
    assert_eq!(stats.useful_reads, 0);
    assert_eq!(stats.not_found, 1);

    let text = std::fs::read_to_string(&fx.out).unwrap();
    let body = sam_body(&text);
    assert_eq!(body.len(), 1);
    let fields: Vec<&str> = body[0].split('\t').collect();
    assert_eq!(fields[1].parse::<u16>().unwrap() & 0x4, 0x4); // unmapped
    assert_eq!(fields[4], "0"); // mapq
}

#[test]
fn test_min_read_length_below_seed_length_rejected() {
    let fx = fixture("seedmap_se_minlen", 17, 1, 0);
    let mut options = test_options(&fx.index_dir, &[fx.fastq.to_str().unwrap()], false);
    options.min_read_length = 4; // index seed length is 16

    let mut context = AlignerContext::new(options, None);
    let err = context.run().unwrap_err();
    assert!(err.to_string().contains("min read length"));
}

#[test]
fn test_multi_thread_stats_merge() {
    let fx = fixture("seedmap_se_merge", 19, 900, 100);
    let mut options = test_options(&fx.index_dir, &[fx.fastq.to_str().unwrap()], false);
    options.num_threads = 4;

    let mut context = AlignerContext::new(options, None);
    context.run().unwrap();

    let stats = context.stats();
    assert_eq!(stats.total_reads, 1000);
    assert_eq!(
        stats.single_hits + stats.multi_hits + stats.not_found,
        1000
    );
    assert_eq!(stats.not_found, 100);
    // Every bucketed time entry came from exactly one read.
    let bucketed: u64 = stats.count_by_time_bucket.iter().sum();
    assert_eq!(bucketed, 1000);
}

#[test]
fn test_single_thread_output_is_deterministic() {
    let fx = fixture("seedmap_se_det", 23, 200, 20);
    let mut options = test_options(&fx.index_dir, &[fx.fastq.to_str().unwrap()], false);
    options.output_file = Some(fx.out.to_string_lossy().into_owned());

    let mut context = AlignerContext::new(options.clone(), None);
    context.run().unwrap();
    let first = std::fs::read(&fx.out).unwrap();

    let mut context = AlignerContext::new(options, None);
    context.run().unwrap();
    let second = std::fs::read(&fx.out).unwrap();

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_sorted_bam_output_is_valid_bgzf() {
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    let fx = fixture("seedmap_se_bam", 29, 50, 5);
    let out = fx.out.with_extension("bam");
    let mut options = test_options(&fx.index_dir, &[fx.fastq.to_str().unwrap()], false);
    options.output_file = Some(out.to_string_lossy().into_owned());
    options.sort_output = true;

    let mut context = AlignerContext::new(options, None);
    context.run().unwrap();

    let compressed = std::fs::read(&out).unwrap();
    let mut raw = Vec::new();
    MultiGzDecoder::new(&compressed[..])
        .read_to_end(&mut raw)
        .unwrap();
    assert_eq!(&raw[0..4], b"BAM\x01");
    // Sorted header plus one record per read.
    let l_text = u32::from_le_bytes(raw[4..8].try_into().unwrap()) as usize;
    let text = std::str::from_utf8(&raw[8..8 + l_text]).unwrap();
    assert!(text.contains("SO:coordinate"));
}

#[test]
fn test_secondary_band_emits_secondaries_for_repeats() {
    let dir = TempDir::with_prefix("seedmap_se_repeat").unwrap();
    // Two identical 400bp arms: every read from one arm also fits the other.
    let arm = random_genome(31, 400);
    let genome = format!("{}{}", arm, arm);
    let index_dir = dir.path().join("index");
    build_test_index(&index_dir, "chr1", &genome);

    let fastq = dir.path().join("reads.fq");
    write_fastq(&fastq, &[("rep0".to_string(), arm[50..110].to_string())]);
    let out = dir.path().join("out.sam");

    let mut options = test_options(
        index_dir.to_str().unwrap(),
        &[fastq.to_str().unwrap()],
        false,
    );
    options.output_file = Some(out.to_string_lossy().into_owned());
    options.max_secondary_additional_edit_distance = Some(1);
    options.max_secondary_alignments = 10;

    let mut context = AlignerContext::new(options, None);
    context.run().unwrap();

    assert_eq!(context.stats().multi_hits, 1);
    let text = std::fs::read_to_string(&out).unwrap();
    let body = sam_body(&text);
    assert_eq!(body.len(), 2, "primary plus one secondary:\n{}", text);
    let secondary: Vec<&String> = body
        .iter()
        .filter(|l| {
            let flag: u16 = l.split('\t').nth(1).unwrap().parse().unwrap();
            flag & 0x100 != 0
        })
        .collect();
    assert_eq!(secondary.len(), 1);
}

#[test]
fn test_dash_index_passes_reads_through_unaligned() {
    let fx = fixture("seedmap_se_dash", 37, 5, 0);
    let out = fx.out.clone();
    let mut options = test_options("-", &[fx.fastq.to_str().unwrap()], false);
    options.output_file = Some(out.to_string_lossy().into_owned());

    let mut context = AlignerContext::new(options, None);
    context.run().unwrap();

    assert_eq!(context.stats().total_reads, 5);
    assert_eq!(context.stats().not_found, 5);
    let text = std::fs::read_to_string(&out).unwrap();
    for line in sam_body(&text) {
        let flag: u16 = line.split('\t').nth(1).unwrap().parse().unwrap();
        assert_eq!(flag & 0x4, 0x4);
    }
}

#[test]
fn test_perf_file_appends_trace_line() {
    let fx = fixture("seedmap_se_perf", 41, 10, 0);
    let perf = fx.fastq.with_file_name("perf.tsv");
    let mut options = test_options(&fx.index_dir, &[fx.fastq.to_str().unwrap()], false);
    options.perf_file = Some(perf.to_string_lossy().into_owned());

    let mut context = AlignerContext::new(options, None);
    context.run().unwrap();

    let text = std::fs::read_to_string(&perf).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].split('\t').count(), 10);
}
