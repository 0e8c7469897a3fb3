// Genome index: seed hash table over the packed reference
//
// The index directory holds two files:
//   genome  — packed 2-bit bases + contig table (see genome.rs)
//   meta    — seed length and format version
//
// The seed table maps every fixed-length exact subsequence of the forward
// strand to its genome locations. Seeds containing N are not indexed.
// The table is rebuilt from the packed genome at load time; the genome
// file itself may be memory-mapped instead of read eagerly.

pub mod build;
pub mod cache;

use crate::genome::{Genome, BASE_N};
use rustc_hash::FxHashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read as IoRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

const META_MAGIC: u32 = 0x534d_4d31; // "SMM1"
pub const DEFAULT_SEED_LENGTH: usize = 20;

/// Errors surfaced while building or loading an index.
#[derive(Debug)]
pub enum IndexError {
    Io(io::Error),
    Format(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::Io(e) => write!(f, "index I/O error: {}", e),
            IndexError::Format(msg) => write!(f, "index format error: {}", msg),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IndexError::Io(e) => Some(e),
            IndexError::Format(_) => None,
        }
    }
}

impl From<io::Error> for IndexError {
    fn from(e: io::Error) -> Self {
        IndexError::Io(e)
    }
}

/// Immutable genome index shared read-only by all workers.
pub struct GenomeIndex {
    genome: Genome,
    seed_length: usize,
    table: FxHashMap<u64, Vec<u32>>,
}

impl GenomeIndex {
    /// Build an index over an in-memory genome.
    pub fn from_genome(genome: Genome, seed_length: usize) -> GenomeIndex {
        assert!(seed_length >= 8 && seed_length <= 31, "seed length out of range");
        let mut table: FxHashMap<u64, Vec<u32>> = FxHashMap::default();
        let n = genome.n_bases();
        if n >= seed_length as u64 {
            // Rolling seed over the forward strand; restart after any N.
            let mask = (1u64 << (2 * seed_length)) - 1;
            let mut seed = 0u64;
            let mut valid = 0usize;
            for loc in 0..n {
                let code = genome.base_at(loc);
                if code == BASE_N {
                    valid = 0;
                    seed = 0;
                    continue;
                }
                seed = ((seed << 2) | code as u64) & mask;
                valid += 1;
                if valid >= seed_length {
                    let start = loc + 1 - seed_length as u64;
                    // Seeds never straddle contig boundaries.
                    if genome.within_one_contig(start, seed_length as u64) {
                        table.entry(seed).or_default().push(start as u32);
                    }
                }
            }
        }
        GenomeIndex {
            genome,
            seed_length,
            table,
        }
    }

    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn seed_length(&self) -> usize {
        self.seed_length
    }

    pub fn bases_count(&self) -> u64 {
        self.genome.n_bases()
    }

    /// Genome locations whose forward strand matches `seed` exactly.
    #[inline]
    pub fn lookup(&self, seed: u64) -> &[u32] {
        self.table.get(&seed).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pack `seed_length` base codes into a table key. Returns None if the
    /// window contains an N.
    #[inline]
    pub fn pack_seed(&self, codes: &[u8]) -> Option<u64> {
        debug_assert_eq!(codes.len(), self.seed_length);
        let mut seed = 0u64;
        for &c in codes {
            if c >= 4 {
                return None;
            }
            seed = (seed << 2) | c as u64;
        }
        Some(seed)
    }

    /// Write the index directory (genome + meta files).
    pub fn save(&self, dir: &Path) -> Result<(), IndexError> {
        fs::create_dir_all(dir)?;
        let mut genome_file = BufWriter::new(File::create(dir.join("genome"))?);
        self.genome.write_to(&mut genome_file)?;
        genome_file.flush()?;

        let mut meta = BufWriter::new(File::create(dir.join("meta"))?);
        meta.write_all(&META_MAGIC.to_le_bytes())?;
        meta.write_all(&(self.seed_length as u32).to_le_bytes())?;
        meta.flush()?;
        Ok(())
    }

    /// Load an index directory. `map` memory-maps the genome file instead
    /// of reading it eagerly; `prefetch` additionally asks the kernel to
    /// fault the mapping in ahead of use.
    pub fn load_from_directory(dir: &Path, map: bool, prefetch: bool) -> Result<GenomeIndex, IndexError> {
        let start = Instant::now();

        let mut meta = File::open(dir.join("meta"))?;
        let mut buf = [0u8; 8];
        meta.read_exact(&mut buf)?;
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != META_MAGIC {
            return Err(IndexError::Format(format!(
                "{} is not an index directory (bad meta magic)",
                dir.display()
            )));
        }
        let seed_length = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
        if !(8..=31).contains(&seed_length) {
            return Err(IndexError::Format(format!(
                "unsupported seed length {} in {}",
                seed_length,
                dir.display()
            )));
        }

        let genome = Genome::load(&dir.join("genome"), map)?;
        if prefetch {
            genome.prefetch();
        }
        let bytes = genome.byte_size();
        let index = GenomeIndex::from_genome(genome, seed_length);

        log::info!(
            "loaded index from {}: {} bytes, {} bases, seed size {}, {:.1}s",
            dir.display(),
            bytes,
            index.bases_count(),
            index.seed_length(),
            start.elapsed().as_secs_f64()
        );
        Ok(index)
    }
}

/// Shared handle to an index, as handed out by the cache.
pub type SharedIndex = Arc<GenomeIndex>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::encode_base;

    fn encode(seq: &str) -> Vec<u8> {
        seq.bytes().map(encode_base).collect()
    }

    fn tiny_index() -> GenomeIndex {
        // 40 bases, seed length 8.
        let genome = Genome::from_contigs(vec![(
            "chr1".to_string(),
            encode("ACGTACGTTTGGCCAATTGGACGTACGTTTGGCCAATTGG"),
        )]);
        GenomeIndex::from_genome(genome, 8)
    }

    #[test]
    fn test_lookup_finds_all_occurrences() {
        let idx = tiny_index();
        let seed = idx.pack_seed(&encode("ACGTACGT")).unwrap();
        let hits = idx.lookup(seed);
        assert_eq!(hits, &[0, 20]);
    }

    #[test]
    fn test_seed_with_n_not_packed() {
        let idx = tiny_index();
        assert!(idx.pack_seed(&encode("ACGTNCGT")).is_none());
    }

    #[test]
    fn test_n_breaks_indexing() {
        let genome = Genome::from_contigs(vec![(
            "c".to_string(),
            encode("ACGTACGTNACGTACGT"),
        )]);
        let idx = GenomeIndex::from_genome(genome, 8);
        let seed = idx.pack_seed(&encode("ACGTACGT")).unwrap();
        // Only the two N-free windows are present.
        assert_eq!(idx.lookup(seed), &[0, 9]);
    }

    #[test]
    fn test_save_load_round_trip() {
        let idx = tiny_index();
        let dir = std::env::temp_dir().join("seedmap_index_rt");
        std::fs::remove_dir_all(&dir).ok();
        idx.save(&dir).unwrap();

        let loaded = GenomeIndex::load_from_directory(&dir, false, false).unwrap();
        assert_eq!(loaded.seed_length(), 8);
        assert_eq!(loaded.bases_count(), idx.bases_count());
        let seed = loaded.pack_seed(&encode("ACGTACGT")).unwrap();
        assert_eq!(loaded.lookup(seed), &[0, 20]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
