// Format-neutral alignment records and their construction
//
// The builder turns (read, alignment result) into records the SAM and BAM
// encoders both consume. CIGAR recovery runs the banded traceback kernel
// against the reference window here, once per written record, keeping the
// scoring hot path free of traceback state.

use crate::aligner::{PairedAlignmentResult, SingleAlignmentResult, NUM_READS_PER_PAIR};
use crate::genome::{complement, encode_base, GenomeLocation};
use crate::index::SharedIndex;
use crate::lv;
use crate::reads::{ClipPolicy, Direction, Read};

pub mod sam_flags {
    pub const PAIRED: u16 = 0x1;
    pub const PROPER_PAIR: u16 = 0x2;
    pub const UNMAPPED: u16 = 0x4;
    pub const MATE_UNMAPPED: u16 = 0x8;
    pub const REVERSE: u16 = 0x10;
    pub const MATE_REVERSE: u16 = 0x20;
    pub const FIRST_IN_PAIR: u16 = 0x40;
    pub const SECOND_IN_PAIR: u16 = 0x80;
    pub const SECONDARY: u16 = 0x100;
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// One output record, independent of the container format. CIGAR ops are
/// over {=, X, I, D, S}; the encoders collapse = and X into M when the
/// use-M flag is set.
#[derive(Debug, Clone)]
pub struct AlignmentRecord {
    pub qname: String,
    pub flag: u16,
    pub ref_id: Option<usize>,
    /// 0-based leftmost reference position within the contig.
    pub pos: u64,
    pub mapq: u8,
    pub cigar: Vec<(u8, u32)>,
    pub mate_ref_id: Option<usize>,
    pub mate_pos: u64,
    pub tlen: i64,
    /// Reference-orientation bases.
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
    pub tags: Vec<(String, String)>,
}

impl AlignmentRecord {
    pub fn is_mapped(&self) -> bool {
        self.flag & sam_flags::UNMAPPED == 0
    }

    /// Reference bases consumed by this record's alignment.
    pub fn reference_span(&self) -> u64 {
        self.cigar
            .iter()
            .filter(|(op, _)| matches!(op, b'=' | b'X' | b'D' | b'M'))
            .map(|(_, n)| *n as u64)
            .sum()
    }

    /// Sort key for coordinate-sorted output: unmapped records last.
    pub fn sort_key(&self) -> (usize, u64) {
        match self.ref_id {
            Some(id) if self.is_mapped() => (id, self.pos),
            _ => (usize::MAX, u64::MAX),
        }
    }
}

/// Builds output records for one worker.
pub struct RecordBuilder {
    index: Option<SharedIndex>,
    clipping: ClipPolicy,
    read_group: Option<String>,
    /// Band for CIGAR recovery; matches the deepest scored distance.
    search_limit: usize,
}

impl RecordBuilder {
    pub fn new(
        index: Option<SharedIndex>,
        clipping: ClipPolicy,
        read_group: Option<String>,
        search_limit: usize,
    ) -> RecordBuilder {
        RecordBuilder {
            index,
            clipping,
            read_group,
            search_limit,
        }
    }

    /// Records for a single-end read: primary first, then secondaries.
    pub fn single_records(
        &self,
        read: &Read,
        result: &SingleAlignmentResult,
        secondaries: &[SingleAlignmentResult],
    ) -> Vec<AlignmentRecord> {
        let mut records = Vec::with_capacity(1 + secondaries.len());
        records.push(self.one_record(read, result, 0, false));
        for sec in secondaries {
            records.push(self.one_record(read, sec, 0, true));
        }
        records
    }

    /// Records for a mate pair: primaries for both mates (with mate
    /// cross-references and TLEN), then each mate's secondaries.
    pub fn pair_records(
        &self,
        reads: [&Read; NUM_READS_PER_PAIR],
        result: &PairedAlignmentResult,
        secondaries: [&[SingleAlignmentResult]; NUM_READS_PER_PAIR],
    ) -> Vec<AlignmentRecord> {
        let mate_flag = [sam_flags::FIRST_IN_PAIR, sam_flags::SECOND_IN_PAIR];
        let mut primaries: Vec<AlignmentRecord> = (0..NUM_READS_PER_PAIR)
            .map(|r| {
                self.one_record(
                    reads[r],
                    &result.results[r],
                    sam_flags::PAIRED | mate_flag[r],
                    false,
                )
            })
            .collect();
        self.cross_reference_mates(&mut primaries, result.aligned_as_pair);

        let mut records = primaries;
        for r in 0..NUM_READS_PER_PAIR {
            for sec in secondaries[r] {
                records.push(self.one_record(
                    reads[r],
                    sec,
                    sam_flags::PAIRED | mate_flag[r],
                    true,
                ));
            }
        }
        records
    }

    fn cross_reference_mates(&self, primaries: &mut [AlignmentRecord], proper_pair: bool) {
        let snapshot: Vec<(bool, Option<usize>, u64, bool)> = primaries
            .iter()
            .map(|p| {
                (
                    p.is_mapped(),
                    p.ref_id,
                    p.pos,
                    p.flag & sam_flags::REVERSE != 0,
                )
            })
            .collect();
        let spans: Vec<u64> = primaries.iter().map(|p| p.reference_span()).collect();

        for (r, rec) in primaries.iter_mut().enumerate() {
            let m = 1 - r;
            let (mate_mapped, mate_ref, mate_pos, mate_rev) = snapshot[m];
            if mate_mapped {
                rec.mate_ref_id = mate_ref;
                rec.mate_pos = mate_pos;
                if mate_rev {
                    rec.flag |= sam_flags::MATE_REVERSE;
                }
                if !rec.is_mapped() {
                    // An unmapped read with a mapped mate is placed at the
                    // mate's coordinates so sorted output keeps them near
                    // each other.
                    rec.ref_id = mate_ref;
                    rec.pos = mate_pos;
                }
            } else {
                rec.flag |= sam_flags::MATE_UNMAPPED;
                if rec.is_mapped() {
                    rec.mate_ref_id = rec.ref_id;
                    rec.mate_pos = rec.pos;
                }
            }

            if proper_pair && rec.is_mapped() && mate_mapped {
                rec.flag |= sam_flags::PROPER_PAIR;
            }

            // Outer fragment length, signed by which mate is leftmost.
            if rec.is_mapped() && mate_mapped && rec.ref_id == mate_ref {
                let my_end = rec.pos + spans[r];
                let mate_end = mate_pos + spans[m];
                let left = rec.pos.min(mate_pos);
                let right = my_end.max(mate_end);
                let span = (right - left) as i64;
                rec.tlen = if rec.pos < mate_pos || (rec.pos == mate_pos && r == 0) {
                    span
                } else {
                    -span
                };
            }
        }
    }

    fn one_record(
        &self,
        read: &Read,
        result: &SingleAlignmentResult,
        pair_flags: u16,
        secondary: bool,
    ) -> AlignmentRecord {
        if !result.is_aligned() {
            return self.unmapped_record(read, pair_flags);
        }
        let index = self
            .index
            .as_ref()
            .expect("aligned result without an index");
        let genome = index.genome();

        let (clip_start, clip_end) = read.clipped_range(self.clipping);
        let len = read.data_length();
        let aligned: Vec<u8> = match result.direction {
            Direction::Forward => read.bases[clip_start..clip_end]
                .iter()
                .map(|&b| encode_base(b))
                .collect(),
            Direction::Reverse => read.bases[clip_start..clip_end]
                .iter()
                .rev()
                .map(|&b| complement(encode_base(b)))
                .collect(),
        };

        let mut window = Vec::with_capacity(aligned.len() + self.search_limit);
        genome.fill_window(
            result.location.0,
            aligned.len() + self.search_limit,
            &mut window,
        );
        let (nm, mut cigar) = lv::banded_alignment(&window, &aligned, self.search_limit)
            .unwrap_or_else(|| {
                // The scorer accepted this hit, so the band cannot really
                // be exceeded; emit a degenerate all-match record rather
                // than dropping the read.
                (result.score, vec![(b'=', aligned.len() as u32)])
            });
        let mut pos = result.location.0;
        // The traceback may open with reference-only ops when the window
        // anchor sits a few bases early; fold them into the position.
        while let Some(&(b'D', n)) = cigar.first() {
            pos += n as u64;
            cigar.remove(0);
        }
        while let Some(&(b'D', _)) = cigar.last() {
            cigar.pop();
        }

        // Soft clips in reference orientation: a front clip on the read
        // trails the alignment when the read mapped reversed.
        let (lead_clip, tail_clip) = match result.direction {
            Direction::Forward => (clip_start, len - clip_end),
            Direction::Reverse => (len - clip_end, clip_start),
        };
        if lead_clip > 0 {
            cigar.insert(0, (b'S', lead_clip as u32));
        }
        if tail_clip > 0 {
            cigar.push((b'S', tail_clip as u32));
        }

        let (seq, qual) = match result.direction {
            Direction::Forward => (read.bases.clone(), read.quals.clone()),
            Direction::Reverse => (
                read.bases
                    .iter()
                    .rev()
                    .map(|&b| crate::genome::decode_base(complement(encode_base(b))))
                    .collect(),
                read.quals.iter().rev().copied().collect(),
            ),
        };

        let (ref_id, contig_pos) = genome
            .locate_idx(GenomeLocation(pos))
            .expect("aligned location outside the genome");

        let mut flag = pair_flags;
        if result.direction == Direction::Reverse {
            flag |= sam_flags::REVERSE;
        }
        if secondary {
            flag |= sam_flags::SECONDARY;
        }

        let mut tags = vec![("NM".to_string(), format!("i:{}", nm))];
        if let Some(rg) = &self.read_group {
            tags.push(("RG".to_string(), format!("Z:{}", rg)));
        }

        AlignmentRecord {
            qname: read.id.clone(),
            flag,
            ref_id: Some(ref_id),
            pos: contig_pos,
            mapq: result.mapq.min(crate::mapq::MAX_MAPQ) as u8,
            cigar,
            mate_ref_id: None,
            mate_pos: 0,
            tlen: 0,
            seq,
            qual,
            tags,
        }
    }

    fn unmapped_record(&self, read: &Read, pair_flags: u16) -> AlignmentRecord {
        let mut tags = Vec::new();
        if let Some(rg) = &self.read_group {
            tags.push(("RG".to_string(), format!("Z:{}", rg)));
        }
        AlignmentRecord {
            qname: read.id.clone(),
            flag: pair_flags | sam_flags::UNMAPPED,
            ref_id: None,
            pos: 0,
            mapq: 0,
            cigar: Vec::new(),
            mate_ref_id: None,
            mate_pos: 0,
            tlen: 0,
            seq: read.bases.clone(),
            qual: read.quals.clone(),
            tags,
        }
    }
}
