// Output writer supplier
//
// One supplier per iteration owns the output file. Each worker obtains its
// own RecordWriter handle, buffers encoded records locally, and appends
// finished chunks under the supplier lock. BGZF makes the BAM path
// concatenation-safe: workers compress their own chunks. With sorted
// output requested, records are staged with their coordinates instead and
// the final sort-and-write pass runs in close(), which is also the join
// point guaranteeing every worker's buffer reached the file.

use super::bam;
use super::record::AlignmentRecord;
use super::sam::{self, HeaderInfo};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

/// Output container format, inferred from the output path extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Sam { use_m: bool },
    Bam { use_m: bool },
}

impl OutputFormat {
    /// None for an extension no writer exists for; the caller treats that
    /// as a configuration error.
    pub fn from_path(path: &str, use_m: bool) -> Option<OutputFormat> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".sam") {
            Some(OutputFormat::Sam { use_m })
        } else if lower.ends_with(".bam") {
            Some(OutputFormat::Bam { use_m })
        } else {
            None
        }
    }

    fn is_bam(&self) -> bool {
        matches!(self, OutputFormat::Bam { .. })
    }
}

/// A record staged for the sort-on-close pass.
struct StagedRecord {
    key: (usize, u64),
    payload: Vec<u8>,
}

struct Sink {
    out: BufWriter<File>,
    header_written: bool,
    staged: Vec<StagedRecord>,
    closed: bool,
}

struct WriterShared {
    format: OutputFormat,
    sort_output: bool,
    header: HeaderInfo,
    sink: Mutex<Sink>,
}

/// Shared factory for per-worker writers; `close` finalizes the file.
pub struct WriterSupplier {
    shared: Arc<WriterShared>,
}

impl WriterSupplier {
    pub fn new(
        path: &str,
        format: OutputFormat,
        sort_output: bool,
        header: HeaderInfo,
    ) -> io::Result<WriterSupplier> {
        let file = File::create(path)?;
        Ok(WriterSupplier {
            shared: Arc::new(WriterShared {
                format,
                sort_output,
                header,
                sink: Mutex::new(Sink {
                    out: BufWriter::new(file),
                    header_written: false,
                    staged: Vec::new(),
                    closed: false,
                }),
            }),
        })
    }

    /// A new writer handle; any number may exist concurrently.
    pub fn get_writer(&self) -> RecordWriter {
        RecordWriter {
            shared: self.shared.clone(),
            buf: Vec::new(),
        }
    }

    /// Flush everything and finalize the container. All worker writers
    /// must be closed first; this is the iteration's join point.
    pub fn close(&self) -> io::Result<()> {
        let mut sink = self.shared.sink.lock().unwrap();
        if sink.closed {
            return Ok(());
        }

        if self.shared.sort_output {
            let mut staged = std::mem::take(&mut sink.staged);
            staged.sort_by_key(|r| r.key);
            if self.shared.format.is_bam() {
                let mut body = Vec::new();
                for r in &staged {
                    body.extend_from_slice(&r.payload);
                }
                let compressed = bam::bgzf_compress(&body);
                sink.out.write_all(&compressed)?;
            } else {
                for r in &staged {
                    sink.out.write_all(&r.payload)?;
                }
            }
        }

        if self.shared.format.is_bam() {
            sink.out.write_all(&bam::BGZF_EOF)?;
        }
        sink.out.flush()?;
        sink.closed = true;
        Ok(())
    }
}

/// Local chunk size before a worker appends to the shared sink.
const FLUSH_THRESHOLD: usize = 256 * 1024;

/// One worker's handle onto the shared output.
pub struct RecordWriter {
    shared: Arc<WriterShared>,
    buf: Vec<u8>,
}

impl RecordWriter {
    /// Write the container header. Called once, through a throwaway
    /// writer, before any records; subsequent calls are no-ops.
    pub fn write_header(&mut self) -> io::Result<()> {
        let mut sink = self.shared.sink.lock().unwrap();
        if sink.header_written {
            return Ok(());
        }
        match self.shared.format {
            OutputFormat::Sam { .. } => {
                let text = sam::header_text(&self.shared.header);
                sink.out.write_all(text.as_bytes())?;
            }
            OutputFormat::Bam { .. } => {
                let bytes = bam::header_bytes(&self.shared.header);
                sink.out.write_all(&bam::bgzf_compress(&bytes))?;
            }
        }
        sink.header_written = true;
        Ok(())
    }

    pub fn write_record(&mut self, rec: &AlignmentRecord) -> io::Result<()> {
        if self.shared.sort_output {
            let payload = self.encode(rec);
            let mut sink = self.shared.sink.lock().unwrap();
            sink.staged.push(StagedRecord {
                key: rec.sort_key(),
                payload,
            });
            return Ok(());
        }

        let encoded = self.encode(rec);
        self.buf.extend_from_slice(&encoded);
        if self.buf.len() >= FLUSH_THRESHOLD {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn encode(&self, rec: &AlignmentRecord) -> Vec<u8> {
        match self.shared.format {
            OutputFormat::Sam { use_m } => {
                let mut out = Vec::new();
                sam::write_record(&mut out, rec, &self.shared.header.refs, use_m);
                out
            }
            OutputFormat::Bam { use_m } => bam::encode_record(rec, use_m),
        }
    }

    fn flush_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = if self.shared.format.is_bam() {
            bam::bgzf_compress(&self.buf)
        } else {
            std::mem::take(&mut self.buf)
        };
        let mut sink = self.shared.sink.lock().unwrap();
        sink.out.write_all(&chunk)?;
        drop(sink);
        self.buf.clear();
        Ok(())
    }

    /// Flush this worker's remaining chunk. Must be called before the
    /// supplier closes.
    pub fn close(mut self) -> io::Result<()> {
        self.flush_chunk()
    }
}
