// BAM binary encoding and BGZF framing
//
// BGZF is a sequence of independently-deflated gzip members, so each
// worker can compress its own record chunks and the supplier just
// concatenates them. The stream ends with the fixed 28-byte EOF member.

use super::record::AlignmentRecord;
use super::sam::{header_text, HeaderInfo};
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::io::Write;

/// Largest payload packed into one BGZF block; leaves headroom for the
/// 64 KiB hard cap after the block wrapper.
const BGZF_BLOCK_PAYLOAD: usize = 0xff00;

/// The fixed empty-block EOF marker from the BAM specification.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Wrap `payload` (at most one block's worth) into a single BGZF block.
fn bgzf_block(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= BGZF_BLOCK_PAYLOAD);
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).expect("deflate to Vec cannot fail");
    let cdata = encoder.finish().expect("deflate to Vec cannot fail");

    let mut crc = Crc::new();
    crc.update(payload);

    let bsize = 12 + 6 + cdata.len() + 8; // header + extra field + cdata + trailer
    let mut block = Vec::with_capacity(bsize);
    block.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04]); // gzip magic, deflate, FEXTRA
    block.extend_from_slice(&[0, 0, 0, 0]); // mtime
    block.extend_from_slice(&[0, 0xff]); // xfl, os
    block.extend_from_slice(&6u16.to_le_bytes()); // xlen
    block.extend_from_slice(&[b'B', b'C']);
    block.extend_from_slice(&2u16.to_le_bytes());
    block.extend_from_slice(&((bsize - 1) as u16).to_le_bytes());
    block.extend_from_slice(&cdata);
    block.extend_from_slice(&crc.sum().to_le_bytes());
    block.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    debug_assert_eq!(block.len(), bsize);
    block
}

/// Compress an arbitrary byte stream into consecutive BGZF blocks.
pub fn bgzf_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(BGZF_BLOCK_PAYLOAD) {
        out.extend_from_slice(&bgzf_block(chunk));
    }
    out
}

/// Uncompressed BAM header: magic, embedded SAM header text, reference
/// dictionary.
pub fn header_bytes(info: &HeaderInfo) -> Vec<u8> {
    let text = header_text(info);
    let mut out = Vec::with_capacity(text.len() + 64);
    out.extend_from_slice(b"BAM\x01");
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(&(info.refs.len() as u32).to_le_bytes());
    for (name, len) in &info.refs {
        out.extend_from_slice(&((name.len() + 1) as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(&(*len as u32).to_le_bytes());
    }
    out
}

fn cigar_op_code(op: u8, use_m: bool) -> u32 {
    match op {
        b'=' if use_m => 0,
        b'X' if use_m => 0,
        b'M' => 0,
        b'I' => 1,
        b'D' => 2,
        b'N' => 3,
        b'S' => 4,
        b'H' => 5,
        b'P' => 6,
        b'=' => 7,
        b'X' => 8,
        _ => 0,
    }
}

fn packed_cigar(cigar: &[(u8, u32)], use_m: bool) -> Vec<u32> {
    let mut packed: Vec<u32> = Vec::with_capacity(cigar.len());
    for &(op, n) in cigar {
        let code = cigar_op_code(op, use_m);
        match packed.last_mut() {
            // Adjacent ops can collapse to the same code under use-M.
            Some(last) if *last & 0xf == code => *last += n << 4,
            _ => packed.push((n << 4) | code),
        }
    }
    packed
}

fn seq_nibble(base: u8) -> u8 {
    match base {
        b'A' | b'a' => 1,
        b'C' | b'c' => 2,
        b'G' | b'g' => 4,
        b'T' | b't' => 8,
        _ => 15,
    }
}

/// BIN field per the SAM specification's region-to-bin mapping.
fn reg2bin(beg: i64, end: i64) -> u16 {
    let end = end - 1;
    if beg >> 14 == end >> 14 {
        return (((1 << 15) - 1) / 7 + (beg >> 14)) as u16;
    }
    if beg >> 17 == end >> 17 {
        return (((1 << 12) - 1) / 7 + (beg >> 17)) as u16;
    }
    if beg >> 20 == end >> 20 {
        return (((1 << 9) - 1) / 7 + (beg >> 20)) as u16;
    }
    if beg >> 23 == end >> 23 {
        return (((1 << 6) - 1) / 7 + (beg >> 23)) as u16;
    }
    if beg >> 26 == end >> 26 {
        return (((1 << 3) - 1) / 7 + (beg >> 26)) as u16;
    }
    0
}

/// Encode one record as uncompressed BAM bytes (block_size prefixed).
pub fn encode_record(rec: &AlignmentRecord, use_m: bool) -> Vec<u8> {
    let name = rec.qname.as_bytes();
    let cigar = packed_cigar(&rec.cigar, use_m);
    let seq_len = rec.seq.len();

    let ref_id = rec.ref_id.map(|r| r as i32).unwrap_or(-1);
    let pos = if rec.ref_id.is_some() { rec.pos as i32 } else { -1 };
    let mate_ref_id = rec.mate_ref_id.map(|r| r as i32).unwrap_or(-1);
    let mate_pos = if rec.mate_ref_id.is_some() {
        rec.mate_pos as i32
    } else {
        -1
    };
    let bin = if rec.is_mapped() {
        reg2bin(rec.pos as i64, rec.pos as i64 + rec.reference_span().max(1) as i64)
    } else {
        0
    };

    let mut body = Vec::with_capacity(32 + name.len() + 1 + cigar.len() * 4 + seq_len);
    body.extend_from_slice(&ref_id.to_le_bytes());
    body.extend_from_slice(&pos.to_le_bytes());
    body.push((name.len() + 1) as u8);
    body.push(rec.mapq);
    body.extend_from_slice(&bin.to_le_bytes());
    body.extend_from_slice(&(cigar.len() as u16).to_le_bytes());
    body.extend_from_slice(&rec.flag.to_le_bytes());
    body.extend_from_slice(&(seq_len as u32).to_le_bytes());
    body.extend_from_slice(&mate_ref_id.to_le_bytes());
    body.extend_from_slice(&mate_pos.to_le_bytes());
    body.extend_from_slice(&(rec.tlen as i32).to_le_bytes());
    body.extend_from_slice(name);
    body.push(0);
    for op in &cigar {
        body.extend_from_slice(&op.to_le_bytes());
    }
    let mut i = 0;
    while i + 1 < seq_len {
        body.push((seq_nibble(rec.seq[i]) << 4) | seq_nibble(rec.seq[i + 1]));
        i += 2;
    }
    if i < seq_len {
        body.push(seq_nibble(rec.seq[i]) << 4);
    }
    for &q in &rec.qual {
        body.push(q.saturating_sub(33)); // phred+33 to raw
    }
    for (tag, value) in &rec.tags {
        encode_tag(&mut body, tag, value);
    }

    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Tags arrive as SAM-format "<type>:<value>" strings; only the types the
/// record builder produces are encoded.
fn encode_tag(body: &mut Vec<u8>, tag: &str, value: &str) {
    let tag = tag.as_bytes();
    if tag.len() != 2 {
        return;
    }
    let Some((ty, val)) = value.split_once(':') else {
        return;
    };
    match ty {
        "i" => {
            if let Ok(v) = val.parse::<i32>() {
                body.extend_from_slice(tag);
                body.push(b'i');
                body.extend_from_slice(&v.to_le_bytes());
            }
        }
        "Z" => {
            body.extend_from_slice(tag);
            body.push(b'Z');
            body.extend_from_slice(val.as_bytes());
            body.push(0);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn roundtrip_bgzf(data: &[u8]) -> Vec<u8> {
        let mut compressed = bgzf_compress(data);
        compressed.extend_from_slice(&BGZF_EOF);
        // BGZF members are plain gzip members; a multi-member decoder
        // recovers the original stream.
        let mut out = Vec::new();
        MultiGzDecoder::new(&compressed[..])
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_bgzf_round_trip() {
        let data: Vec<u8> = (0..200_000u32).map(|x| (x % 251) as u8).collect();
        assert_eq!(roundtrip_bgzf(&data), data);
    }

    #[test]
    fn test_bgzf_block_size_field() {
        let block = bgzf_block(b"hello bgzf");
        let bsize = u16::from_le_bytes([block[16], block[17]]) as usize;
        assert_eq!(bsize, block.len() - 1);
    }

    #[test]
    fn test_header_bytes_layout() {
        let info = HeaderInfo {
            refs: vec![("chr1".to_string(), 248_956_422)],
            sorted: false,
            read_group: None,
            command_line: "x".to_string(),
        };
        let bytes = header_bytes(&info);
        assert_eq!(&bytes[0..4], b"BAM\x01");
        let l_text = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let n_ref =
            u32::from_le_bytes(bytes[8 + l_text..12 + l_text].try_into().unwrap());
        assert_eq!(n_ref, 1);
    }

    #[test]
    fn test_encode_record_fixed_fields() {
        let rec = AlignmentRecord {
            qname: "r1".to_string(),
            flag: 16,
            ref_id: Some(2),
            pos: 1234,
            mapq: 37,
            cigar: vec![(b'=', 50)],
            mate_ref_id: None,
            mate_pos: 0,
            tlen: 0,
            seq: vec![b'A'; 50],
            qual: vec![b'I'; 50],
            tags: vec![("NM".to_string(), "i:0".to_string())],
        };
        let bytes = encode_record(&rec, false);
        let block_size = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        assert_eq!(block_size, bytes.len() - 4);
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), 2); // refID
        assert_eq!(i32::from_le_bytes(bytes[8..12].try_into().unwrap()), 1234); // pos
        assert_eq!(bytes[12], 3); // l_read_name including NUL
        assert_eq!(bytes[13], 37); // mapq
    }

    #[test]
    fn test_use_m_merges_cigar_codes() {
        let packed = packed_cigar(&[(b'=', 20), (b'X', 1), (b'=', 9)], true);
        assert_eq!(packed, vec![30 << 4]);
        let split = packed_cigar(&[(b'=', 20), (b'X', 1), (b'=', 9)], false);
        assert_eq!(split.len(), 3);
        assert_eq!(split[0] & 0xf, 7);
        assert_eq!(split[1] & 0xf, 8);
    }

    #[test]
    fn test_unmapped_record_sentinels() {
        let rec = AlignmentRecord {
            qname: "u".to_string(),
            flag: 4,
            ref_id: None,
            pos: 0,
            mapq: 0,
            cigar: vec![],
            mate_ref_id: None,
            mate_pos: 0,
            tlen: 0,
            seq: b"ACGT".to_vec(),
            qual: vec![b'I'; 4],
            tags: vec![],
        };
        let bytes = encode_record(&rec, false);
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), -1);
        assert_eq!(i32::from_le_bytes(bytes[8..12].try_into().unwrap()), -1);
    }
}
