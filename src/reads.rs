// Read and per-iteration reader parameters

use crate::genome::encode_base;
use crate::index::SharedIndex;

/// Strand a read aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Soft-clip policy for low-quality read ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipPolicy {
    NoClipping,
    ClipFront,
    ClipBack,
    ClipFrontAndBack,
}

impl Default for ClipPolicy {
    fn default() -> Self {
        ClipPolicy::ClipBack
    }
}

/// Quality at or below this is considered uninformative for clipping
/// (Illumina '#', phred 2).
const CLIP_QUALITY: u8 = b'#';

/// One sequencing fragment: bases, per-base qualities, and its identifier.
#[derive(Debug, Clone)]
pub struct Read {
    pub id: String,
    /// ASCII bases (ACGTN).
    pub bases: Vec<u8>,
    /// Phred+33 qualities, same length as `bases`.
    pub quals: Vec<u8>,
}

impl Read {
    pub fn new(id: String, bases: Vec<u8>, quals: Vec<u8>) -> Read {
        debug_assert_eq!(bases.len(), quals.len());
        Read { id, bases, quals }
    }

    #[inline]
    pub fn data_length(&self) -> usize {
        self.bases.len()
    }

    /// Base codes (0..=4) for the whole read.
    pub fn encoded(&self) -> Vec<u8> {
        self.bases.iter().map(|&b| encode_base(b)).collect()
    }

    /// The [start, end) range that survives the clipping policy: leading
    /// and/or trailing runs of uninformative quality are trimmed.
    pub fn clipped_range(&self, policy: ClipPolicy) -> (usize, usize) {
        let mut start = 0usize;
        let mut end = self.quals.len();
        if matches!(policy, ClipPolicy::ClipFront | ClipPolicy::ClipFrontAndBack) {
            while start < end && self.quals[start] <= CLIP_QUALITY {
                start += 1;
            }
        }
        if matches!(policy, ClipPolicy::ClipBack | ClipPolicy::ClipFrontAndBack) {
            while end > start && self.quals[end - 1] <= CLIP_QUALITY {
                end -= 1;
            }
        }
        (start, end)
    }
}

/// Immutable per-iteration parameters threaded to every read producer.
/// Copied by value into each worker; never mutated after the iteration
/// begins.
#[derive(Clone)]
pub struct ReaderContext {
    pub clipping: ClipPolicy,
    pub default_read_group: String,
    pub index: Option<SharedIndex>,
    pub ignore_secondary_alignments: bool,
    pub ignore_supplementary_alignments: bool,
}

impl ReaderContext {
    pub fn new(index: Option<SharedIndex>) -> ReaderContext {
        ReaderContext {
            clipping: ClipPolicy::default(),
            default_read_group: String::new(),
            index,
            ignore_secondary_alignments: true,
            ignore_supplementary_alignments: true,
        }
    }
}
