// Top-level alignment driver
//
// AlignerContext owns one run: load or reuse the index, snapshot the
// iteration configuration, build the reader and writer suppliers, fan out
// a fixed pool of workers, join them, merge statistics, and report. The
// single-end and paired-end differences live behind IterationDriver,
// a three-operation capability the two concrete drivers implement.
//
// Worker lifecycle: each worker owns its reader partition, its writer
// handle, its aligner (scratch preallocated against the arena
// reservation), and its stats. Nothing is shared but the index and the
// writer supplier's internally-locked sink. Stats merge at the join.

use crate::aligner::base::BaseAligner;
use crate::aligner::chimeric::ChimericAligner;
use crate::aligner::separate::SeparateAligner;
use crate::aligner::{
    AlignerConfig, AlignmentStatus, PairAlignmentEngine, PairSecondaryBuffer,
    PairedAlignmentResult, SingleAlignmentResult, NUM_READS_PER_PAIR,
};
use crate::arena::Arena;
use crate::extension::{ExtensionFactory, NoopExtension};
use crate::index::{self, SharedIndex};
use crate::io::fastq::{ReadItem, ReadSource, ReaderSupplier};
use crate::io::record::RecordBuilder;
use crate::io::sam::HeaderInfo;
use crate::io::writer::{OutputFormat, RecordWriter, WriterSupplier};
use crate::mapq::MAPQ_LIMIT_FOR_SINGLE_HIT;
use crate::options::AlignerOptions;
use crate::reads::{ClipPolicy, ReaderContext};
use crate::stats::{AlignerStats, TIME_BUCKETS};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

/// Errors surfaced by the driver. Configuration and resource problems
/// abort before workers start; I/O failures mid-run terminate only the
/// affected worker.
#[derive(Debug)]
pub enum AlignerError {
    Config(String),
    ResourceLoad(String),
    Io(io::Error),
    Invariant(String),
}

impl fmt::Display for AlignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignerError::Config(msg) => write!(f, "configuration error: {}", msg),
            AlignerError::ResourceLoad(msg) => write!(f, "resource load failed: {}", msg),
            AlignerError::Io(e) => write!(f, "I/O error: {}", e),
            AlignerError::Invariant(msg) => write!(f, "internal invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for AlignerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AlignerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AlignerError {
    fn from(e: io::Error) -> Self {
        AlignerError::Io(e)
    }
}

/// Everything a worker needs, shared read-only across the pool.
struct WorkerEnv {
    index: Option<SharedIndex>,
    config: AlignerConfig,
    clipping: ClipPolicy,
    read_group: Option<String>,
    bind_to_processors: bool,
}

impl WorkerEnv {
    fn record_builder(&self) -> RecordBuilder {
        RecordBuilder::new(
            self.index.clone(),
            self.clipping,
            self.read_group.as_ref().and_then(|rg| extract_rg_id(rg)),
            self.config.search_limit() as usize,
        )
    }
}

/// Pull the ID field out of an @RG line, or take the value verbatim.
fn extract_rg_id(rg: &str) -> Option<String> {
    if let Some(idx) = rg.find("ID:") {
        let rest = &rg[idx + 3..];
        let end = rest.find(['\t', ' ']).unwrap_or(rest.len());
        return Some(rest[..end].to_string());
    }
    if rg.starts_with('@') {
        return None;
    }
    Some(rg.to_string())
}

/// The operations that differ between the single-end and paired-end
/// drivers; everything else is common context machinery.
trait IterationDriver: Sync {
    /// Build this mode's reader supplier.
    fn begin_iteration(
        &self,
        options: &AlignerOptions,
        n_workers: usize,
    ) -> Result<ReaderSupplier, AlignerError>;

    /// One worker's read loop. Returns the loop's wall time in nanos
    /// (started after aligner allocation, so arena setup is excluded).
    fn run_worker(
        &self,
        env: &WorkerEnv,
        source: &mut ReadSource,
        writer: &mut Option<RecordWriter>,
        stats: &mut AlignerStats,
    ) -> Result<u64, AlignerError>;

    /// Legacy end-of-run cleanup hook. Single-iteration is the only
    /// supported mode; nothing currently overrides this.
    fn next_iteration(&self) {}
}

struct SingleDriver;

impl IterationDriver for SingleDriver {
    fn begin_iteration(
        &self,
        options: &AlignerOptions,
        n_workers: usize,
    ) -> Result<ReaderSupplier, AlignerError> {
        ReaderSupplier::single(&options.inputs, n_workers).map_err(AlignerError::Io)
    }

    fn run_worker(
        &self,
        env: &WorkerEnv,
        source: &mut ReadSource,
        writer: &mut Option<RecordWriter>,
        stats: &mut AlignerStats,
    ) -> Result<u64, AlignerError> {
        let mut aligner = env
            .index
            .as_ref()
            .map(|idx| BaseAligner::new(idx.clone(), env.config.clone(), env.clipping));
        let builder = env.record_builder();
        let mut secondary = Arena::secondary_buffer(&env.config);

        let loop_start = Instant::now();
        while let Some(item) = source.next_item() {
            let read = match item? {
                ReadItem::Single(r) => r,
                ReadItem::Pair(..) => {
                    return Err(AlignerError::Invariant(
                        "paired input reached the single-end driver".to_string(),
                    ))
                }
            };

            let t0 = Instant::now();
            secondary.clear();
            let result = match aligner.as_mut() {
                Some(a) => a.align_read(&read, &mut secondary),
                None => SingleAlignmentResult::not_found(),
            };
            stats.record_time(t0.elapsed().as_nanos() as u64);
            record_read_outcome(stats, read.data_length(), &result, env.config.min_read_length);
            if secondary.overflowed() {
                stats.secondary_overflows += 1;
            }

            if let Some(w) = writer.as_mut() {
                for rec in builder.single_records(&read, &result, secondary.results()) {
                    w.write_record(&rec)?;
                }
            }
        }
        let nanos = loop_start.elapsed().as_nanos() as u64;

        if let Some(a) = &aligner {
            stats.lv_calls += a.lv_calls();
        }
        Ok(nanos)
    }
}

struct PairedDriver {
    separate: bool,
}

impl IterationDriver for PairedDriver {
    fn begin_iteration(
        &self,
        options: &AlignerOptions,
        n_workers: usize,
    ) -> Result<ReaderSupplier, AlignerError> {
        ReaderSupplier::paired(&options.inputs, n_workers).map_err(AlignerError::Io)
    }

    fn run_worker(
        &self,
        env: &WorkerEnv,
        source: &mut ReadSource,
        writer: &mut Option<RecordWriter>,
        stats: &mut AlignerStats,
    ) -> Result<u64, AlignerError> {
        let mut engine: Option<Box<dyn PairAlignmentEngine>> = env.index.as_ref().map(|idx| {
            if self.separate {
                Box::new(SeparateAligner::new(idx.clone(), env.config.clone(), env.clipping))
                    as Box<dyn PairAlignmentEngine>
            } else {
                Box::new(ChimericAligner::new(idx.clone(), env.config.clone(), env.clipping))
                    as Box<dyn PairAlignmentEngine>
            }
        });
        let builder = env.record_builder();
        let mut single_secondary = Arena::secondary_buffer(&env.config);
        let mut pair_secondary = PairSecondaryBuffer::new(env.config.max_secondary_alignments);

        let loop_start = Instant::now();
        while let Some(item) = source.next_item() {
            let (read0, read1) = match item? {
                ReadItem::Pair(a, b) => (a, b),
                ReadItem::Single(_) => {
                    return Err(AlignerError::Invariant(
                        "single-end input reached the paired driver".to_string(),
                    ))
                }
            };

            let t0 = Instant::now();
            single_secondary.clear();
            pair_secondary.clear();
            let (result, counts) = match engine.as_mut() {
                Some(e) => e.align_pair(&read0, &read1, &mut pair_secondary, &mut single_secondary),
                None => (PairedAlignmentResult::not_found(), Default::default()),
            };
            stats.record_time(t0.elapsed().as_nanos() as u64);

            let reads = [&read0, &read1];
            for r in 0..NUM_READS_PER_PAIR {
                record_read_outcome(
                    stats,
                    reads[r].data_length(),
                    &result.results[r],
                    env.config.min_read_length,
                );
                if result.aligned_as_pair {
                    stats.aligned_as_pairs += 1;
                }
            }
            if single_secondary.overflowed() || pair_secondary.overflowed() {
                stats.secondary_overflows += 1;
            }

            if let Some(w) = writer.as_mut() {
                // Mates' single-end secondaries pack contiguously in the
                // shared buffer; pair-level secondaries split per mate.
                let singles = single_secondary.results();
                let mut sec0 = singles[..counts.first].to_vec();
                let mut sec1 = singles[counts.first..counts.first + counts.second].to_vec();
                for p in pair_secondary.results() {
                    sec0.push(p.results[0]);
                    sec1.push(p.results[1]);
                }
                for rec in builder.pair_records([&read0, &read1], &result, [&sec0, &sec1]) {
                    w.write_record(&rec)?;
                }
            }
        }
        let nanos = loop_start.elapsed().as_nanos() as u64;

        if let Some(e) = &engine {
            stats.lv_calls += e.lv_calls();
        }
        Ok(nanos)
    }
}

fn record_read_outcome(
    stats: &mut AlignerStats,
    data_length: usize,
    result: &SingleAlignmentResult,
    min_read_length: usize,
) {
    stats.total_reads += 1;
    if data_length >= min_read_length {
        stats.useful_reads += 1;
    }
    match result.status {
        AlignmentStatus::NotFound | AlignmentStatus::UnknownAlignment => stats.not_found += 1,
        AlignmentStatus::SingleHit if result.mapq >= MAPQ_LIMIT_FOR_SINGLE_HIT => {
            stats.single_hits += 1
        }
        _ => stats.multi_hits += 1,
    }
    if result.is_aligned() {
        stats.record_mapq(result.mapq);
        stats.record_edit_distance(result.score);
    }
}

#[cfg(target_os = "linux")]
fn bind_to_processor(worker: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(worker % num_cpus::get(), &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(target_os = "linux"))]
fn bind_to_processor(_worker: usize) {}

/// One alignment run, from options to stats.
pub struct AlignerContext {
    options: AlignerOptions,
    extension: Box<dyn ExtensionFactory>,
    index: Option<SharedIndex>,
    stats: AlignerStats,
    reader_context: Option<ReaderContext>,
    reader_supplier: Option<ReaderSupplier>,
    writer_supplier: Option<WriterSupplier>,
    perf_file: Option<File>,
    align_time_ms: u64,
    /// First worker failure, surfaced after partial results are reported.
    worker_error: Option<AlignerError>,
}

impl AlignerContext {
    pub fn new(options: AlignerOptions, extension: Option<Box<dyn ExtensionFactory>>) -> AlignerContext {
        AlignerContext {
            options,
            extension: extension.unwrap_or_else(|| Box::new(NoopExtension)),
            index: None,
            stats: AlignerStats::new(),
            reader_context: None,
            reader_supplier: None,
            writer_supplier: None,
            perf_file: None,
            align_time_ms: 0,
            worker_error: None,
        }
    }

    pub fn stats(&self) -> &AlignerStats {
        &self.stats
    }

    pub fn align_time_ms(&self) -> u64 {
        self.align_time_ms
    }

    pub fn reader_context(&self) -> Option<&ReaderContext> {
        self.reader_context.as_ref()
    }

    /// Execute the whole run. Configuration and resource errors abort
    /// eagerly; alignment-phase worker failures are logged and produce
    /// partial results.
    pub fn run(&mut self) -> Result<(), AlignerError> {
        self.initialize()?;

        let run_start = Instant::now();
        log::info!("Beginning aligner timer.");
        self.extension.initialize(&self.options);

        if !self.extension.skip_alignment() {
            log::info!("Aligning.");
            let driver: Box<dyn IterationDriver> = if self.options.paired {
                Box::new(PairedDriver {
                    separate: self.options.separate_mates,
                })
            } else {
                Box::new(SingleDriver)
            };

            self.begin_iteration(driver.as_ref())?;
            self.run_task(driver.as_ref())?;
            self.finish_iteration()?;
            self.print_stats_header();
            self.print_stats();
            driver.next_iteration();
        }

        self.extension.finish_alignment();
        let elapsed = run_start.elapsed();
        log::info!(
            "Aligning took: {} seconds {:.2} minutes",
            elapsed.as_secs(),
            elapsed.as_secs_f64() / 60.0
        );

        // Worker failures were already logged and the surviving workers'
        // results reported; the run still exits nonzero.
        match self.worker_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn initialize(&mut self) -> Result<(), AlignerError> {
        self.index = index::cache::load_or_reuse(
            Path::new(&self.options.index_dir),
            self.options.map_index,
            self.options.prefetch_index,
        )
        .map_err(|e| AlignerError::ResourceLoad(e.to_string()))?;

        if let Some(idx) = &self.index {
            if self.options.min_read_length < idx.seed_length() {
                return Err(AlignerError::Config(format!(
                    "The min read length ({}) must be at least the seed length ({}), or \
                     there's no hope of aligning reads that short.",
                    self.options.min_read_length,
                    idx.seed_length()
                )));
            }
        }

        if let Some(path) = &self.options.perf_file {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(|e| {
                    AlignerError::ResourceLoad(format!("Unable to open perf file '{}': {}", path, e))
                })?;
            self.perf_file = Some(file);
        }
        Ok(())
    }

    fn begin_iteration(&mut self, driver: &dyn IterationDriver) -> Result<(), AlignerError> {
        self.stats = AlignerStats::new();
        self.stats.extra = self.extension.extra_stats();
        self.extension.begin_iteration();

        let mut reader_context = ReaderContext::new(self.index.clone());
        reader_context.clipping = self.options.clipping;
        reader_context.default_read_group = self
            .options
            .read_group
            .clone()
            .unwrap_or_default();
        reader_context.ignore_secondary_alignments = self.options.ignore_secondary_alignments;
        reader_context.ignore_supplementary_alignments =
            self.options.ignore_supplementary_alignments;
        self.reader_context = Some(reader_context);

        self.reader_supplier =
            Some(driver.begin_iteration(&self.options, self.options.num_threads)?);

        if let Some(path) = &self.options.output_file {
            let format = OutputFormat::from_path(path, self.options.use_m).ok_or_else(|| {
                // The options parser catches this; reaching here means a
                // new output format was added without a writer.
                AlignerError::Invariant(format!("unknown file type for '{}'", path))
            })?;
            let refs = match &self.index {
                Some(idx) => idx
                    .genome()
                    .contigs()
                    .iter()
                    .map(|c| (c.name.clone(), c.length))
                    .collect(),
                None => Vec::new(),
            };
            let header = HeaderInfo {
                refs,
                sorted: self.options.sort_output,
                read_group: self.options.read_group.clone(),
                command_line: format!(
                    "seedmap {} {}",
                    if self.options.paired { "paired" } else { "single" },
                    self.options.to_args().join(" ")
                ),
            };
            let supplier = WriterSupplier::new(path, format, self.options.sort_output, header)?;
            let mut header_writer = supplier.get_writer();
            header_writer.write_header()?;
            header_writer.close()?;
            self.writer_supplier = Some(supplier);
        }
        Ok(())
    }

    fn run_task(&mut self, driver: &dyn IterationDriver) -> Result<(), AlignerError> {
        let n_workers = self.options.num_threads;
        let mut reader_supplier = self
            .reader_supplier
            .take()
            .expect("run_task before begin_iteration");

        // Workers see the iteration's snapshot, not live options.
        let reader_context = self
            .reader_context
            .clone()
            .expect("run_task before begin_iteration");
        let env = WorkerEnv {
            index: reader_context.index.clone(),
            config: self.options.aligner_config(),
            clipping: reader_context.clipping,
            read_group: if reader_context.default_read_group.is_empty() {
                None
            } else {
                Some(reader_context.default_read_group.clone())
            },
            bind_to_processors: self.options.bind_to_processors,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_workers)
            .build()
            .map_err(|e| AlignerError::Config(format!("cannot build worker pool: {}", e)))?;

        let joined: Mutex<Vec<(AlignerStats, u64, Option<AlignerError>)>> = Mutex::new(Vec::new());
        pool.scope(|scope| {
            for w in 0..n_workers {
                let mut source = reader_supplier.take_reader(w);
                let mut writer = self.writer_supplier.as_ref().map(|ws| ws.get_writer());
                let mut observer = self.extension.observer();
                let env = &env;
                let joined = &joined;
                scope.spawn(move |_| {
                    if env.bind_to_processors {
                        bind_to_processor(w);
                    }
                    observer.begin_thread();

                    let mut stats = AlignerStats::new();
                    let outcome = driver.run_worker(env, &mut source, &mut writer, &mut stats);
                    if let Some(wr) = writer.take() {
                        if let Err(e) = wr.close() {
                            log::error!("worker {}: closing writer failed: {}", w, e);
                        }
                    }
                    observer.finish_thread(&mut stats);

                    let (nanos, error) = match outcome {
                        Ok(nanos) => (nanos, None),
                        Err(e) => {
                            // The worker stops; everyone else drains and
                            // the iteration reports partial results.
                            log::error!("worker {} terminated: {}", w, e);
                            (0, Some(e))
                        }
                    };
                    joined.lock().unwrap().push((stats, nanos, error));
                });
            }
        });
        reader_supplier.finish();

        let mut align_nanos = 0u64;
        for (worker_stats, nanos, error) in joined.into_inner().unwrap() {
            self.stats.add(&worker_stats);
            align_nanos = align_nanos.max(nanos);
            if self.worker_error.is_none() {
                self.worker_error = error;
            }
        }
        self.align_time_ms = align_nanos / 1_000_000;
        Ok(())
    }

    fn finish_iteration(&mut self) -> Result<(), AlignerError> {
        self.extension.finish_iteration();
        if let Some(supplier) = self.writer_supplier.take() {
            supplier.close()?;
        }
        Ok(())
    }

    fn print_stats_header(&self) {
        log::info!(
            "Total Reads    Aligned, MAPQ >= {:2}    Aligned, MAPQ < {:2}     Unaligned              \
             Too Short/Too Many Ns  %Pairs\tReads/s   Time in Aligner (s)",
            MAPQ_LIMIT_FOR_SINGLE_HIT,
            MAPQ_LIMIT_FOR_SINGLE_HIT
        );
    }

    fn print_stats(&mut self) {
        let s = &self.stats;
        let too_short = s.total_reads - s.useful_reads;
        log::info!(
            "{:<14} {} {} {} {} {:.2}%\t{:<9} {}",
            s.total_reads,
            num_pct(s.single_hits, s.pct(s.single_hits)),
            num_pct(s.multi_hits, s.pct(s.multi_hits)),
            num_pct(s.not_found, s.pct(s.not_found)),
            num_pct(too_short, s.pct(too_short)),
            s.pct(s.aligned_as_pairs),
            s.reads_per_second(self.align_time_ms),
            (self.align_time_ms + 500) / 1000
        );

        if let Some(perf) = self.perf_file.as_mut() {
            let line = perf_line(&self.options, s, self.align_time_ms);
            if let Err(e) = perf.write_all(line.as_bytes()) {
                log::error!("writing perf trace failed: {}", e);
            }
        }

        log::debug!("Per-read alignment time histogram: log2(ns)\tcount\ttotal time (ns)");
        for i in 0..TIME_BUCKETS {
            if s.count_by_time_bucket[i] > 0 {
                log::debug!(
                    "{}\t{}\t{}",
                    i,
                    s.count_by_time_bucket[i],
                    s.nanos_by_time_bucket[i]
                );
            }
        }

        if let Some(extra) = &s.extra {
            log::info!("{}", extra);
        }
    }
}

/// "count (pct%)" cell for the stats table.
fn num_pct(count: u64, pct: f64) -> String {
    format!("{:<10} ({:.02}%)", count, pct)
}

/// One tab-separated perf-trace line per iteration.
fn perf_line(options: &AlignerOptions, stats: &AlignerStats, align_time_ms: u64) -> String {
    let useful = stats.useful_reads.max(1);
    format!(
        "{}\t{}\t{:.2}%\t{:.2}%\t{:.2}%\t{:.2}%\t{}\t{:.2}%\t{}\t{:.0}\n",
        options.max_hits,
        options.max_dist,
        stats.pct(stats.useful_reads),
        stats.pct(stats.single_hits),
        stats.pct(stats.multi_hits),
        stats.pct(stats.not_found),
        stats.lv_calls,
        stats.pct(stats.aligned_as_pairs),
        stats.total_reads,
        (1000.0 * useful as f64) / align_time_ms.max(1) as f64
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::GenomeLocation;
    use crate::reads::Direction;

    fn hit(mapq: u32, status: AlignmentStatus) -> SingleAlignmentResult {
        SingleAlignmentResult {
            status,
            location: GenomeLocation(100),
            direction: Direction::Forward,
            mapq,
            score: 1,
        }
    }

    #[test]
    fn test_outcome_classification() {
        let mut stats = AlignerStats::new();
        record_read_outcome(&mut stats, 100, &hit(60, AlignmentStatus::SingleHit), 50);
        record_read_outcome(&mut stats, 100, &hit(2, AlignmentStatus::SingleHit), 50);
        record_read_outcome(&mut stats, 100, &hit(3, AlignmentStatus::MultipleHits), 50);
        record_read_outcome(&mut stats, 100, &SingleAlignmentResult::not_found(), 50);
        record_read_outcome(&mut stats, 10, &SingleAlignmentResult::not_found(), 50);

        assert_eq!(stats.total_reads, 5);
        assert_eq!(stats.useful_reads, 4);
        assert_eq!(stats.single_hits, 1);
        assert_eq!(stats.multi_hits, 2);
        assert_eq!(stats.not_found, 2);
        assert_eq!(
            stats.total_reads,
            stats.single_hits + stats.multi_hits + stats.not_found
        );
    }

    #[test]
    fn test_extract_rg_id() {
        assert_eq!(extract_rg_id("sample1"), Some("sample1".to_string()));
        assert_eq!(
            extract_rg_id("@RG\tID:lane3\tSM:bar"),
            Some("lane3".to_string())
        );
        assert_eq!(extract_rg_id("@RG\tSM:bar"), None);
    }

    #[test]
    fn test_perf_line_field_order() {
        let cli_fields = perf_line(
            &test_options(),
            &{
                let mut s = AlignerStats::new();
                s.total_reads = 100;
                s.useful_reads = 90;
                s.single_hits = 80;
                s.multi_hits = 5;
                s.not_found = 15;
                s.lv_calls = 1234;
                s
            },
            2000,
        );
        let fields: Vec<&str> = cli_fields.trim_end().split('\t').collect();
        assert_eq!(fields.len(), 10);
        assert_eq!(fields[0], "300"); // max_hits
        assert_eq!(fields[1], "14"); // max_dist
        assert_eq!(fields[6], "1234"); // lv_calls
        assert_eq!(fields[8], "100"); // total_reads
        assert_eq!(fields[9], "45"); // 1000 * 90 useful / 2000 ms
    }

    fn test_options() -> AlignerOptions {
        use crate::options::AlignCli;
        use clap::Parser;

        #[derive(Parser)]
        struct Harness {
            #[command(flatten)]
            align: AlignCli,
        }
        let cli = Harness::parse_from(["harness", "idx", "in.fq"]).align;
        AlignerOptions::from_cli(cli, false, false).unwrap()
    }
}
