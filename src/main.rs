use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use seedmap::context::AlignerContext;
use seedmap::index::build::build_index;
use seedmap::index::DEFAULT_SEED_LENGTH;
use seedmap::options::{AlignCli, AlignerOptions};

#[derive(Parser)]
#[command(name = "seedmap")]
#[command(about = "Seed-hash short-read DNA aligner with bounded edit distance", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
    #[arg(short = 'v', long, global = true, value_name = "INT", default_value_t = 3)]
    verbosity: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a genome index directory from a FASTA reference
    Index {
        /// Input FASTA file
        #[arg(value_name = "REF.FA")]
        fasta: PathBuf,

        /// Output index directory
        #[arg(value_name = "INDEX-DIR")]
        out_dir: PathBuf,

        /// Seed length for the index hash table
        #[arg(short = 'k', long, value_name = "INT", default_value_t = DEFAULT_SEED_LENGTH)]
        seed_length: usize,
    },

    /// Align single-end reads
    Single(AlignCli),

    /// Align paired-end reads (input files in mate order: r1 r2 [r1 r2 ...])
    Paired(AlignCli),
}

fn init_logger(verbosity: i32) {
    let level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn run_alignment(cli: AlignCli, paired: bool) -> ExitCode {
    let options = match AlignerOptions::from_cli(cli, paired, false) {
        Ok(o) => o,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let mut context = AlignerContext::new(options, None);
    match context.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbosity);

    match cli.command {
        Commands::Index {
            fasta,
            out_dir,
            seed_length,
        } => {
            if !(8..=31).contains(&seed_length) {
                log::error!("seed length {} out of range (8..=31)", seed_length);
                return ExitCode::from(2);
            }
            log::info!("Building index for reference: {}", fasta.display());
            if let Err(e) = build_index(&fasta, &out_dir, seed_length) {
                log::error!("Index building failed: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Commands::Single(args) => run_alignment(args, false),
        Commands::Paired(args) => run_alignment(args, true),
    }
}
