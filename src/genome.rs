// Reference genome representation
//
// The genome is stored 2-bit packed (A=0, C=1, G=2, T=3); ambiguous bases
// are recorded in a separate exclusion list and read back as N. Contigs are
// concatenated into one coordinate space, so alignment works on flat
// genome locations and is translated back to (contig, offset) only when
// records are written.

use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read as IoRead, Write};
use std::path::Path;

/// A position in the concatenated genome coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenomeLocation(pub u64);

impl GenomeLocation {
    /// Sentinel for "no location" (unaligned reads).
    pub const INVALID: GenomeLocation = GenomeLocation(u64::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for GenomeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "*")
        }
    }
}

/// One reference sequence within the genome.
#[derive(Debug, Clone)]
pub struct Contig {
    pub name: String,
    /// Start of this contig in the concatenated coordinate space.
    pub offset: u64,
    pub length: u64,
}

/// Base encoding used throughout: 0..=3 for ACGT, 4 for N.
pub const BASE_N: u8 = 4;

#[inline]
pub fn encode_base(b: u8) -> u8 {
    match b {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => BASE_N,
    }
}

#[inline]
pub fn decode_base(code: u8) -> u8 {
    match code {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        3 => b'T',
        _ => b'N',
    }
}

#[inline]
pub fn complement(code: u8) -> u8 {
    if code < 4 { 3 - code } else { BASE_N }
}

// Packed base storage: either owned (built in memory or loaded eagerly) or
// memory-mapped from the on-disk genome file. Both hold the same 2-bit
// layout, 4 bases per byte, low bits first.
enum BaseStore {
    Owned(Vec<u8>),
    Mapped { map: Mmap, data_offset: usize },
}

impl BaseStore {
    #[inline]
    fn packed(&self) -> &[u8] {
        match self {
            BaseStore::Owned(v) => v,
            BaseStore::Mapped { map, data_offset } => &map[*data_offset..],
        }
    }
}

/// The reference genome: packed bases plus the contig table.
pub struct Genome {
    store: BaseStore,
    /// Sorted positions of ambiguous (N) bases.
    n_positions: Vec<u64>,
    contigs: Vec<Contig>,
    n_bases: u64,
}

const GENOME_MAGIC: u32 = 0x534d_4731; // "SMG1"

impl Genome {
    /// Build a genome in memory from decoded contig sequences (0..=4 codes).
    pub fn from_contigs(contigs: Vec<(String, Vec<u8>)>) -> Genome {
        let n_bases: u64 = contigs.iter().map(|(_, s)| s.len() as u64).sum();
        let mut packed = vec![0u8; (n_bases as usize).div_ceil(4)];
        let mut n_positions = Vec::new();
        let mut table = Vec::with_capacity(contigs.len());
        let mut pos = 0u64;
        for (name, seq) in contigs {
            table.push(Contig {
                name,
                offset: pos,
                length: seq.len() as u64,
            });
            for &code in &seq {
                let code = if code >= 4 {
                    n_positions.push(pos);
                    0
                } else {
                    code
                };
                packed[(pos / 4) as usize] |= code << ((pos % 4) * 2);
                pos += 1;
            }
        }
        Genome {
            store: BaseStore::Owned(packed),
            n_positions,
            contigs: table,
            n_bases,
        }
    }

    pub fn n_bases(&self) -> u64 {
        self.n_bases
    }

    pub fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    /// Base code at a flat genome location.
    #[inline]
    pub fn base_at(&self, loc: u64) -> u8 {
        debug_assert!(loc < self.n_bases);
        let byte = self.store.packed()[(loc / 4) as usize];
        let code = (byte >> ((loc % 4) * 2)) & 0x3;
        if !self.n_positions.is_empty() && self.n_positions.binary_search(&loc).is_ok() {
            BASE_N
        } else {
            code
        }
    }

    /// Copy `len` bases starting at `start` into `buf`, truncating at the
    /// end of the genome. Returns the number of bases copied.
    pub fn fill_window(&self, start: u64, len: usize, buf: &mut Vec<u8>) -> usize {
        buf.clear();
        let end = (start + len as u64).min(self.n_bases);
        for loc in start..end {
            buf.push(self.base_at(loc));
        }
        buf.len()
    }

    /// Translate a flat location into (contig, 0-based offset within it).
    pub fn locate(&self, loc: GenomeLocation) -> Option<(&Contig, u64)> {
        self.locate_idx(loc)
            .map(|(idx, off)| (&self.contigs[idx], off))
    }

    /// As `locate`, but yields the contig's table index.
    pub fn locate_idx(&self, loc: GenomeLocation) -> Option<(usize, u64)> {
        if !loc.is_valid() || loc.0 >= self.n_bases {
            return None;
        }
        let idx = match self
            .contigs
            .binary_search_by(|c| c.offset.cmp(&loc.0))
        {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Some((idx, loc.0 - self.contigs[idx].offset))
    }

    /// True when the window [start, start+len) stays inside one contig.
    pub fn within_one_contig(&self, start: u64, len: u64) -> bool {
        match self.locate(GenomeLocation(start)) {
            Some((contig, off)) => off + len <= contig.length,
            None => false,
        }
    }

    /// Serialize to the on-disk genome file format.
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&GENOME_MAGIC.to_le_bytes())?;
        w.write_all(&self.n_bases.to_le_bytes())?;
        w.write_all(&(self.contigs.len() as u32).to_le_bytes())?;
        for c in &self.contigs {
            let name = c.name.as_bytes();
            w.write_all(&(name.len() as u32).to_le_bytes())?;
            w.write_all(name)?;
            w.write_all(&c.offset.to_le_bytes())?;
            w.write_all(&c.length.to_le_bytes())?;
        }
        w.write_all(&(self.n_positions.len() as u64).to_le_bytes())?;
        for &p in &self.n_positions {
            w.write_all(&p.to_le_bytes())?;
        }
        w.write_all(self.store.packed())?;
        Ok(())
    }

    /// Load from the on-disk genome file, either eagerly or memory-mapped.
    pub fn load(path: &Path, map: bool) -> io::Result<Genome> {
        let mut file = File::open(path)?;
        // Header is small; read it eagerly in both modes.
        let (n_bases, contigs, n_positions, data_offset) = {
            let mut fixed = [0u8; 16];
            file.read_exact(&mut fixed)?;
            let magic = u32::from_le_bytes(fixed[0..4].try_into().unwrap());
            if magic != GENOME_MAGIC {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "not a genome file (bad magic)",
                ));
            }
            let n_bases = u64::from_le_bytes(fixed[4..12].try_into().unwrap());
            let n_contigs = u32::from_le_bytes(fixed[12..16].try_into().unwrap());
            let mut offset = 16usize;
            let mut contigs = Vec::with_capacity(n_contigs as usize);
            for _ in 0..n_contigs {
                let mut len_buf = [0u8; 4];
                file.read_exact(&mut len_buf)?;
                let name_len = u32::from_le_bytes(len_buf) as usize;
                let mut name = vec![0u8; name_len];
                file.read_exact(&mut name)?;
                let mut rest = [0u8; 16];
                file.read_exact(&mut rest)?;
                contigs.push(Contig {
                    name: String::from_utf8(name).map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidData, "contig name is not UTF-8")
                    })?,
                    offset: u64::from_le_bytes(rest[0..8].try_into().unwrap()),
                    length: u64::from_le_bytes(rest[8..16].try_into().unwrap()),
                });
                offset += 4 + name_len + 16;
            }
            let mut count_buf = [0u8; 8];
            file.read_exact(&mut count_buf)?;
            let n_count = u64::from_le_bytes(count_buf) as usize;
            offset += 8;
            let mut n_positions = Vec::with_capacity(n_count);
            let mut pos_buf = [0u8; 8];
            for _ in 0..n_count {
                file.read_exact(&mut pos_buf)?;
                n_positions.push(u64::from_le_bytes(pos_buf));
            }
            offset += n_count * 8;
            (n_bases, contigs, n_positions, offset)
        };

        let store = if map {
            let mapped = unsafe { Mmap::map(&file)? };
            BaseStore::Mapped {
                map: mapped,
                data_offset,
            }
        } else {
            let mut packed = Vec::with_capacity((n_bases as usize).div_ceil(4));
            file.read_to_end(&mut packed)?;
            if packed.len() < (n_bases as usize).div_ceil(4) {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "genome file truncated",
                ));
            }
            BaseStore::Owned(packed)
        };

        Ok(Genome {
            store,
            n_positions,
            contigs,
            n_bases,
        })
    }

    /// Hint the kernel to fault the packed bases in ahead of use.
    pub fn prefetch(&self) {
        if let BaseStore::Mapped { map, .. } = &self.store {
            unsafe {
                libc::madvise(
                    map.as_ptr() as *mut libc::c_void,
                    map.len(),
                    libc::MADV_WILLNEED,
                );
            }
        }
    }

    /// Approximate resident size in bytes (for the load report).
    pub fn byte_size(&self) -> usize {
        self.store.packed().len() + self.n_positions.len() * 8
    }
}
