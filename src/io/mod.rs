// Input and output plumbing
//
// Readers partition FASTQ input across workers; writers funnel per-worker
// record streams into one SAM or BAM file. Both sides hide their internals
// behind supplier types so the alignment loop never touches file formats.

pub mod bam;
pub mod fastq;
pub mod record;
pub mod sam;
pub mod writer;
