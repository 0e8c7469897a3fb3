// SAM text encoding

use super::record::AlignmentRecord;
use std::io::Write;

/// Everything the header needs, shared by the SAM and BAM writers.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    /// (name, length) per reference sequence, in genome order.
    pub refs: Vec<(String, u64)>,
    pub sorted: bool,
    /// Raw @RG line content (without the leading "@RG\t"), if any.
    pub read_group: Option<String>,
    /// Command line, reproduced in the @PG line.
    pub command_line: String,
}

/// Full header text (also embedded verbatim in BAM).
pub fn header_text(info: &HeaderInfo) -> String {
    let mut text = String::new();
    text.push_str(&format!(
        "@HD\tVN:1.6\tSO:{}\n",
        if info.sorted { "coordinate" } else { "unsorted" }
    ));
    for (name, len) in &info.refs {
        text.push_str(&format!("@SQ\tSN:{}\tLN:{}\n", name, len));
    }
    if let Some(rg) = &info.read_group {
        if rg.starts_with("@RG") {
            text.push_str(rg);
            text.push('\n');
        } else {
            text.push_str(&format!("@RG\tID:{}\n", rg));
        }
    }
    const PKG_NAME: &str = env!("CARGO_PKG_NAME");
    const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
    text.push_str(&format!(
        "@PG\tID:{}\tPN:{}\tVN:{}\tCL:{}\n",
        PKG_NAME, PKG_NAME, PKG_VERSION, info.command_line
    ));
    text
}

fn cigar_string(cigar: &[(u8, u32)], use_m: bool) -> String {
    if cigar.is_empty() {
        return "*".to_string();
    }
    let mut s = String::new();
    let mut pending_m = 0u32;
    for &(op, n) in cigar {
        if use_m && matches!(op, b'=' | b'X') {
            pending_m += n;
            continue;
        }
        if pending_m > 0 {
            s.push_str(&format!("{}M", pending_m));
            pending_m = 0;
        }
        s.push_str(&format!("{}{}", n, op as char));
    }
    if pending_m > 0 {
        s.push_str(&format!("{}M", pending_m));
    }
    s
}

/// Append one SAM line for `rec` to `out`.
pub fn write_record(
    out: &mut Vec<u8>,
    rec: &AlignmentRecord,
    refs: &[(String, u64)],
    use_m: bool,
) {
    // An unmapped read placed at its mate's coordinates keeps that ref_id.
    let rname = match rec.ref_id {
        Some(id) => refs[id].0.as_str(),
        None => "*",
    };
    let rnext = match rec.mate_ref_id {
        Some(id) => {
            if rec.ref_id == rec.mate_ref_id {
                "="
            } else {
                refs[id].0.as_str()
            }
        }
        None => "*",
    };
    let pos_field = match rec.ref_id {
        Some(_) => rec.pos + 1,
        None => 0,
    };
    let pnext_field = match rec.mate_ref_id {
        Some(_) => rec.mate_pos + 1,
        None => 0,
    };
    let seq = if rec.seq.is_empty() {
        "*".to_string()
    } else {
        String::from_utf8_lossy(&rec.seq).into_owned()
    };
    let qual = if rec.qual.is_empty() {
        "*".to_string()
    } else {
        String::from_utf8_lossy(&rec.qual).into_owned()
    };

    write!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        rec.qname,
        rec.flag,
        rname,
        pos_field,
        rec.mapq,
        cigar_string(&rec.cigar, use_m),
        rnext,
        pnext_field,
        rec.tlen,
        seq,
        qual
    )
    .expect("write to Vec cannot fail");
    for (tag, value) in &rec.tags {
        write!(out, "\t{}:{}", tag, value).expect("write to Vec cannot fail");
    }
    out.push(b'\n');
}
