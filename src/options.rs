// Alignment options: CLI shape, resolution, and cross-field validation
//
// The clap layer only collects values; everything semantic happens in
// `AlignerOptions::from_cli`: the bare "," input terminator, stdin rules,
// the edit-distance budget against MAX_K, and the secondary-band bound.
// A bare "," after the inputs is how a wrapping daemon chains runs; in
// that mode stdin cannot be an input (the daemon owns the pipe).

use crate::aligner::{AlignerConfig, MAX_K};
use crate::io::fastq::InputFile;
use crate::io::writer::OutputFormat;
use crate::reads::ClipPolicy;
use clap::Args;
use std::fmt;

/// Configuration errors; all are surfaced before any worker starts.
#[derive(Debug)]
pub enum ConfigError {
    NoInputs,
    EditDistanceTooLarge,
    SecondaryBandTooDeep,
    StdinTwice,
    StdinInDaemonMode,
    OddPairedInputs,
    UnknownOutputFormat(String),
    BadClipping(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoInputs => write!(f, "No input files specified"),
            ConfigError::EditDistanceTooLarge => write!(
                f,
                "You specified too large of a maximum edit distance combined with extra \
                 search depth. They must add up to less than {}.",
                MAX_K
            ),
            ConfigError::SecondaryBandTooDeep => write!(
                f,
                "The max edit distance for secondary alignments cannot be bigger than \
                 the extra search depth"
            ),
            ConfigError::StdinTwice => {
                write!(f, "stdin ('-') may be specified for at most one input")
            }
            ConfigError::StdinInDaemonMode => {
                write!(f, "You may not use stdin/stdout in daemon mode")
            }
            ConfigError::OddPairedInputs => {
                write!(f, "paired mode requires an even number of input files")
            }
            ConfigError::UnknownOutputFormat(path) => {
                write!(f, "unknown output file format for '{}' (use .sam or .bam)", path)
            }
            ConfigError::BadClipping(v) => {
                write!(f, "unknown clipping policy '{}' (back, front, both, none)", v)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Command-line surface shared by the single and paired subcommands.
// Note: --max-hits has no -h short to avoid conflict with --help.
#[derive(Args, Debug, Clone)]
pub struct AlignCli {
    /// Genome index directory ("-" runs without alignment, I/O only)
    #[arg(value_name = "INDEX-DIR")]
    pub index_dir: String,

    /// Input FASTQ files (plain or .gz, "-" for stdin), optionally
    /// terminated by a bare ","
    #[arg(value_name = "INPUTS", required = true, num_args = 1.., allow_hyphen_values = false)]
    pub inputs: Vec<String>,

    /// Max candidate locations per seed before it is considered useless
    #[arg(long = "max-hits", value_name = "INT", default_value_t = 300)]
    pub max_hits: usize,

    /// Max edit distance considered
    #[arg(short = 'd', long = "max-dist", value_name = "INT", default_value_t = 14)]
    pub max_dist: u32,

    /// Additional edit distance searched beyond the best hit
    #[arg(short = 'D', long = "extra-search-depth", value_name = "INT", default_value_t = 2)]
    pub extra_search_depth: u32,

    /// Worker thread count (default: hardware threads)
    #[arg(short = 't', long = "num-threads", value_name = "INT")]
    pub num_threads: Option<usize>,

    /// Sort the output by coordinate on close
    #[arg(long = "sort-output", alias = "so")]
    pub sort_output: bool,

    /// Output file; format inferred from the extension (.sam or .bam)
    #[arg(short = 'o', long = "output-file", value_name = "FILE")]
    pub output_file: Option<String>,

    /// Emit CIGAR M instead of =/X
    #[arg(short = 'M', long = "use-m")]
    pub use_m: bool,

    /// Soft-clip policy for low-quality read ends: back, front, both, none
    #[arg(long = "clipping", value_name = "POLICY", default_value = "back")]
    pub clipping: String,

    /// Reads shorter than this are reported unaligned
    #[arg(long = "min-read-length", value_name = "INT", default_value_t = 50)]
    pub min_read_length: usize,

    /// Cap on secondary alignments per read
    #[arg(long = "max-secondary-alignments", alias = "omax", value_name = "INT")]
    pub max_secondary_alignments: Option<usize>,

    /// Edit-distance band for secondary alignments; enables their output
    #[arg(
        long = "max-secondary-additional-edit-distance",
        alias = "om",
        value_name = "INT"
    )]
    pub max_secondary_additional_edit_distance: Option<u32>,

    /// Append a one-line performance trace per run to this file
    #[arg(long = "perf-file", alias = "pf", value_name = "FILE")]
    pub perf_file: Option<String>,

    /// Memory-map the index instead of reading it eagerly
    #[arg(long = "map-index")]
    pub map_index: bool,

    /// Ask the kernel to prefetch the mapped index
    #[arg(long = "prefetch-index")]
    pub prefetch_index: bool,

    /// Explicit seeds per read (0 derives the count from seed coverage)
    #[arg(short = 'n', long = "num-seeds", value_name = "INT", default_value_t = 0)]
    pub num_seeds: usize,

    /// Seed coverage per read when --num-seeds is 0
    #[arg(long = "seed-coverage", value_name = "FLOAT", default_value_t = 1.0)]
    pub seed_coverage: f64,

    /// Skip candidates with fewer agreeing seeds when heavier ones exist
    #[arg(long = "min-weight-to-check", value_name = "INT", default_value_t = 1)]
    pub min_weight_to_check: u32,

    /// Drop secondary alignments present in the input [default: true]
    #[arg(long = "ignore-secondary", value_name = "BOOL")]
    pub ignore_secondary_alignments: Option<bool>,

    /// Drop supplementary alignments present in the input
    /// (defaults to the --ignore-secondary value)
    #[arg(long = "ignore-supplementary", value_name = "BOOL")]
    pub ignore_supplementary_alignments: Option<bool>,

    /// Read group line (content after @RG) for the header and records
    #[arg(short = 'R', long = "read-group", value_name = "STR")]
    pub read_group: Option<String>,

    /// Abort on an insane MAPQ instead of logging and continuing
    #[arg(long = "strict-mapq")]
    pub strict_mapq: bool,

    /// Pin workers to processors
    #[arg(long = "bind-to-processors")]
    pub bind_to_processors: bool,

    /// Minimum mate spacing for the paired insert model
    #[arg(short = 's', long = "min-spacing", value_name = "INT", default_value_t = 50)]
    pub min_spacing: u32,

    /// Maximum mate spacing for the paired insert model
    #[arg(short = 'S', long = "max-spacing", value_name = "INT", default_value_t = 1000)]
    pub max_spacing: u32,

    /// Always align mates independently (mate-pair libraries with huge
    /// or unknown insert distributions)
    #[arg(long = "separate-mates")]
    pub separate_mates: bool,
}

/// Fully resolved alignment options.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignerOptions {
    pub index_dir: String,
    pub inputs: Vec<InputFile>,
    /// A bare "," terminated the inputs (daemon continuation).
    pub daemon_continuation: bool,
    pub paired: bool,

    pub max_hits: usize,
    pub max_dist: u32,
    pub extra_search_depth: u32,
    pub num_threads: usize,
    pub sort_output: bool,
    pub output_file: Option<String>,
    pub use_m: bool,
    pub clipping: ClipPolicy,
    pub min_read_length: usize,
    pub max_secondary_alignments: usize,
    /// None disables secondary output entirely.
    pub max_secondary_additional_edit_distance: Option<u32>,
    pub perf_file: Option<String>,
    pub map_index: bool,
    pub prefetch_index: bool,
    pub num_seeds: usize,
    pub seed_coverage: f64,
    pub min_weight_to_check: u32,
    pub ignore_secondary_alignments: bool,
    pub ignore_supplementary_alignments: bool,
    pub read_group: Option<String>,
    pub strict_mapq: bool,
    pub bind_to_processors: bool,
    pub min_spacing: u32,
    pub max_spacing: u32,
    pub separate_mates: bool,
}

fn parse_clipping(value: &str) -> Result<ClipPolicy, ConfigError> {
    match value {
        "back" => Ok(ClipPolicy::ClipBack),
        "front" => Ok(ClipPolicy::ClipFront),
        "both" => Ok(ClipPolicy::ClipFrontAndBack),
        "none" => Ok(ClipPolicy::NoClipping),
        other => Err(ConfigError::BadClipping(other.to_string())),
    }
}

fn clipping_name(policy: ClipPolicy) -> &'static str {
    match policy {
        ClipPolicy::ClipBack => "back",
        ClipPolicy::ClipFront => "front",
        ClipPolicy::ClipFrontAndBack => "both",
        ClipPolicy::NoClipping => "none",
    }
}

impl AlignerOptions {
    /// Resolve and validate the CLI values. `daemon` marks invocation
    /// from a command pipe, which forbids stdin inputs.
    pub fn from_cli(cli: AlignCli, paired: bool, daemon: bool) -> Result<AlignerOptions, ConfigError> {
        // Inputs end at a bare ","; anything after it belongs to the next
        // daemon command and has already been split off by the caller.
        let mut inputs = Vec::new();
        let mut daemon_continuation = false;
        for raw in &cli.inputs {
            if raw == "," {
                daemon_continuation = true;
                break;
            }
            inputs.push(InputFile::new(raw.clone()));
        }

        if inputs.is_empty() {
            return Err(ConfigError::NoInputs);
        }
        let n_stdin = inputs.iter().filter(|f| f.is_stdio()).count();
        if n_stdin > 0 && daemon {
            return Err(ConfigError::StdinInDaemonMode);
        }
        if n_stdin > 1 {
            return Err(ConfigError::StdinTwice);
        }
        if paired && inputs.len() % 2 != 0 {
            return Err(ConfigError::OddPairedInputs);
        }

        if (cli.max_dist + cli.extra_search_depth) as usize >= MAX_K {
            return Err(ConfigError::EditDistanceTooLarge);
        }
        if let Some(band) = cli.max_secondary_additional_edit_distance {
            if band > cli.extra_search_depth {
                return Err(ConfigError::SecondaryBandTooDeep);
            }
        }
        if let Some(path) = &cli.output_file {
            if OutputFormat::from_path(path, cli.use_m).is_none() {
                return Err(ConfigError::UnknownOutputFormat(path.clone()));
            }
        }
        let clipping = parse_clipping(&cli.clipping)?;

        Ok(AlignerOptions {
            index_dir: cli.index_dir,
            inputs,
            daemon_continuation,
            paired,
            max_hits: cli.max_hits,
            max_dist: cli.max_dist,
            extra_search_depth: cli.extra_search_depth,
            num_threads: cli.num_threads.unwrap_or_else(num_cpus::get).max(1),
            sort_output: cli.sort_output,
            output_file: cli.output_file,
            use_m: cli.use_m,
            clipping,
            min_read_length: cli.min_read_length,
            max_secondary_alignments: cli
                .max_secondary_alignments
                .unwrap_or(usize::MAX >> 1),
            max_secondary_additional_edit_distance: cli.max_secondary_additional_edit_distance,
            perf_file: cli.perf_file,
            map_index: cli.map_index,
            prefetch_index: cli.prefetch_index,
            num_seeds: cli.num_seeds,
            seed_coverage: cli.seed_coverage,
            min_weight_to_check: cli.min_weight_to_check,
            ignore_secondary_alignments: cli.ignore_secondary_alignments.unwrap_or(true),
            ignore_supplementary_alignments: cli
                .ignore_supplementary_alignments
                .unwrap_or_else(|| cli.ignore_secondary_alignments.unwrap_or(true)),
            read_group: cli.read_group,
            strict_mapq: cli.strict_mapq,
            bind_to_processors: cli.bind_to_processors,
            min_spacing: cli.min_spacing,
            max_spacing: cli.max_spacing,
            separate_mates: cli.separate_mates,
        })
    }

    /// Re-emit the canonical argument vector for these options. Parsing
    /// the result reproduces the same options value; the @PG line also
    /// uses this.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.index_dir.clone()];
        for input in &self.inputs {
            args.push(input.path.clone());
        }
        if self.daemon_continuation {
            args.push(",".to_string());
        }
        args.push("--max-hits".into());
        args.push(self.max_hits.to_string());
        args.push("--max-dist".into());
        args.push(self.max_dist.to_string());
        args.push("--extra-search-depth".into());
        args.push(self.extra_search_depth.to_string());
        args.push("--num-threads".into());
        args.push(self.num_threads.to_string());
        if self.sort_output {
            args.push("--sort-output".into());
        }
        if let Some(path) = &self.output_file {
            args.push("--output-file".into());
            args.push(path.clone());
        }
        if self.use_m {
            args.push("--use-m".into());
        }
        args.push("--clipping".into());
        args.push(clipping_name(self.clipping).to_string());
        args.push("--min-read-length".into());
        args.push(self.min_read_length.to_string());
        if self.max_secondary_alignments != usize::MAX >> 1 {
            args.push("--max-secondary-alignments".into());
            args.push(self.max_secondary_alignments.to_string());
        }
        if let Some(band) = self.max_secondary_additional_edit_distance {
            args.push("--max-secondary-additional-edit-distance".into());
            args.push(band.to_string());
        }
        if let Some(path) = &self.perf_file {
            args.push("--perf-file".into());
            args.push(path.clone());
        }
        if self.map_index {
            args.push("--map-index".into());
        }
        if self.prefetch_index {
            args.push("--prefetch-index".into());
        }
        args.push("--num-seeds".into());
        args.push(self.num_seeds.to_string());
        args.push("--seed-coverage".into());
        args.push(self.seed_coverage.to_string());
        args.push("--min-weight-to-check".into());
        args.push(self.min_weight_to_check.to_string());
        args.push("--ignore-secondary".into());
        args.push(self.ignore_secondary_alignments.to_string());
        args.push("--ignore-supplementary".into());
        args.push(self.ignore_supplementary_alignments.to_string());
        if let Some(rg) = &self.read_group {
            args.push("--read-group".into());
            args.push(rg.clone());
        }
        if self.strict_mapq {
            args.push("--strict-mapq".into());
        }
        if self.bind_to_processors {
            args.push("--bind-to-processors".into());
        }
        args.push("--min-spacing".into());
        args.push(self.min_spacing.to_string());
        args.push("--max-spacing".into());
        args.push(self.max_spacing.to_string());
        if self.separate_mates {
            args.push("--separate-mates".into());
        }
        args
    }

    /// The per-iteration kernel parameters.
    pub fn aligner_config(&self) -> AlignerConfig {
        AlignerConfig {
            max_hits: self.max_hits,
            max_dist: self.max_dist,
            extra_search_depth: self.extra_search_depth,
            min_read_length: self.min_read_length,
            num_seeds: self.num_seeds,
            seed_coverage: self.seed_coverage,
            min_weight_to_check: self.min_weight_to_check,
            max_secondary_alignments: if self.max_secondary_additional_edit_distance.is_some() {
                self.max_secondary_alignments
            } else {
                0
            },
            max_secondary_additional_edit_distance: self
                .max_secondary_additional_edit_distance
                .unwrap_or(0),
            min_spacing: self.min_spacing,
            max_spacing: self.max_spacing,
            strict_mapq: self.strict_mapq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        align: AlignCli,
    }

    fn parse(args: &[&str]) -> AlignCli {
        let mut full = vec!["harness"];
        full.extend_from_slice(args);
        Harness::parse_from(full).align
    }

    #[test]
    fn test_minimal_invocation() {
        let opts = AlignerOptions::from_cli(parse(&["idx", "in.fq"]), false, false).unwrap();
        assert_eq!(opts.index_dir, "idx");
        assert_eq!(opts.inputs, vec![InputFile::new("in.fq")]);
        assert!(!opts.daemon_continuation);
        assert_eq!(opts.max_dist, 14);
        assert!(opts.num_threads >= 1);
    }

    #[test]
    fn test_comma_terminates_inputs() {
        let opts =
            AlignerOptions::from_cli(parse(&["idx", "a.fq", "b.fq", ","]), false, false).unwrap();
        assert_eq!(opts.inputs.len(), 2);
        assert!(opts.daemon_continuation);
    }

    #[test]
    fn test_no_inputs_is_an_error() {
        let err = AlignerOptions::from_cli(parse(&["idx", ","]), false, false).unwrap_err();
        assert!(err.to_string().contains("No input files specified"));
    }

    #[test]
    fn test_edit_distance_budget() {
        let cli = parse(&["idx", "in.fq", "-d", "60", "-D", "10"]);
        let err = AlignerOptions::from_cli(cli, false, false).unwrap_err();
        assert!(err.to_string().contains("too large of a maximum edit distance"));

        let cli = parse(&["idx", "in.fq", "-d", "60", "-D", "3"]);
        assert!(AlignerOptions::from_cli(cli, false, false).is_ok());
    }

    #[test]
    fn test_secondary_band_bound() {
        let cli = parse(&[
            "idx",
            "in.fq",
            "-D",
            "2",
            "--max-secondary-additional-edit-distance",
            "3",
        ]);
        assert!(matches!(
            AlignerOptions::from_cli(cli, false, false),
            Err(ConfigError::SecondaryBandTooDeep)
        ));
    }

    #[test]
    fn test_stdin_rules() {
        let cli = parse(&["idx", "-", "-"]);
        assert!(matches!(
            AlignerOptions::from_cli(cli, false, false),
            Err(ConfigError::StdinTwice)
        ));

        let cli = parse(&["idx", "-"]);
        assert!(matches!(
            AlignerOptions::from_cli(cli, false, true),
            Err(ConfigError::StdinInDaemonMode)
        ));

        let cli = parse(&["idx", "-"]);
        assert!(AlignerOptions::from_cli(cli, false, false).is_ok());
    }

    #[test]
    fn test_paired_needs_even_inputs() {
        let cli = parse(&["idx", "a.fq", "b.fq", "c.fq"]);
        assert!(matches!(
            AlignerOptions::from_cli(cli, true, false),
            Err(ConfigError::OddPairedInputs)
        ));
    }

    #[test]
    fn test_unknown_output_format_rejected() {
        let cli = parse(&["idx", "in.fq", "-o", "out.vcf"]);
        assert!(matches!(
            AlignerOptions::from_cli(cli, false, false),
            Err(ConfigError::UnknownOutputFormat(_))
        ));
    }

    #[test]
    fn test_supplementary_defaults_to_secondary_setting() {
        let opts = AlignerOptions::from_cli(parse(&["idx", "in.fq"]), false, false).unwrap();
        assert_eq!(
            opts.ignore_secondary_alignments,
            opts.ignore_supplementary_alignments
        );
    }

    #[test]
    fn test_options_round_trip_through_args() {
        let cli = parse(&[
            "idx",
            "a.fq",
            "b.fq",
            "--max-dist",
            "10",
            "-D",
            "4",
            "--sort-output",
            "-o",
            "out.bam",
            "-M",
            "--clipping",
            "both",
            "--max-secondary-additional-edit-distance",
            "2",
            "--read-group",
            "sample7",
            "--min-spacing",
            "100",
            "--max-spacing",
            "900",
            "--num-threads",
            "3",
        ]);
        let opts = AlignerOptions::from_cli(cli, true, false).unwrap();
        let args = opts.to_args();
        let reparsed: Vec<&str> = args.iter().map(String::as_str).collect();
        let opts2 = AlignerOptions::from_cli(parse(&reparsed), true, false).unwrap();
        assert_eq!(opts, opts2);
    }

    #[test]
    fn test_aligner_config_disables_secondaries_without_band() {
        let opts = AlignerOptions::from_cli(parse(&["idx", "in.fq"]), false, false).unwrap();
        let cfg = opts.aligner_config();
        assert_eq!(cfg.max_secondary_alignments, 0);

        let opts = AlignerOptions::from_cli(
            parse(&["idx", "in.fq", "--max-secondary-additional-edit-distance", "1"]),
            false,
            false,
        )
        .unwrap();
        assert!(opts.aligner_config().max_secondary_alignments > 0);
    }
}
