//! seedmap: a short-read DNA aligner built around a seed-hash genome
//! index and a bounded-edit-distance inner kernel.
//!
//! The library surface mirrors the pipeline: an index is loaded (or
//! reused) through the process-wide cache, `AlignerContext` drives an
//! iteration of parallel workers, and each worker runs reads through the
//! single-end aligner or one of the paired-end engines before handing
//! records to the SAM/BAM writer supplier.

pub mod aligner;
pub mod arena;
pub mod context;
pub mod extension;
pub mod genome;
pub mod index;
pub mod io;
pub mod lv;
pub mod mapq;
pub mod options;
pub mod reads;
pub mod stats;
