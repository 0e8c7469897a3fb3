// FASTQ input: partitioning reads across workers
//
// Plain single-end files are split by byte range so each worker owns an
// independent slice of the input with no coordination at all; the reader
// resynchronizes to the next record boundary after seeking. Compressed
// files, stdin, and paired inputs cannot be seeked into, so those fall
// back to a feeder thread pushing batches of records through a bounded
// channel that all workers drain.

use crate::reads::Read;
use bio::io::fastq;
use crossbeam_channel::{bounded, Receiver, Sender};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

/// One input file as named on the command line. "-" is stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: String,
}

impl InputFile {
    pub fn new(path: impl Into<String>) -> InputFile {
        InputFile { path: path.into() }
    }

    pub fn is_stdio(&self) -> bool {
        self.path == "-"
    }

    pub fn is_compressed(&self) -> bool {
        self.path.ends_with(".gz")
    }
}

/// A unit of work handed to a worker: one read, or one mate pair.
pub enum ReadItem {
    Single(Read),
    Pair(Read, Read),
}

/// Channel capacity for the feeder fallback; keeps the feeder one batch
/// ahead without buffering the whole input.
const FEEDER_CHANNEL_CAPACITY: usize = 4096;

/// One worker's view of the input.
pub enum ReadSource {
    Ranges {
        readers: Vec<RangeReader>,
        current: usize,
    },
    Channel(Receiver<io::Result<ReadItem>>),
}

impl ReadSource {
    /// Next item, or None at end of this worker's partition. Range
    /// readers drain in command-line order.
    pub fn next_item(&mut self) -> Option<io::Result<ReadItem>> {
        match self {
            ReadSource::Ranges { readers, current } => loop {
                let reader = readers.get_mut(*current)?;
                match reader.next_read() {
                    Some(Ok(read)) => return Some(Ok(ReadItem::Single(read))),
                    Some(Err(e)) => return Some(Err(e)),
                    None => *current += 1,
                }
            },
            ReadSource::Channel(rx) => rx.recv().ok(),
        }
    }
}

/// Hands each worker an independent reader over its input partition.
pub struct ReaderSupplier {
    sources: Vec<Option<ReadSource>>,
    feeder: Option<JoinHandle<()>>,
}

impl ReaderSupplier {
    /// Single-end input. Plain files partition by byte range; anything
    /// unseekable switches the whole input to the feeder fallback.
    pub fn single(inputs: &[InputFile], n_workers: usize) -> io::Result<ReaderSupplier> {
        let seekable = inputs.iter().all(|f| !f.is_stdio() && !f.is_compressed());
        if !seekable {
            return Self::feed(inputs.to_vec(), n_workers, false);
        }

        let mut per_worker: Vec<Vec<RangeReader>> = (0..n_workers).map(|_| Vec::new()).collect();
        for input in inputs {
            let len = std::fs::metadata(&input.path)?.len();
            let chunk = len / n_workers as u64 + 1;
            for (w, ranges) in per_worker.iter_mut().enumerate() {
                let start = chunk * w as u64;
                let end = (start + chunk).min(len);
                if start < len {
                    ranges.push(RangeReader::new(PathBuf::from(&input.path), start, end));
                }
            }
        }
        Ok(ReaderSupplier {
            sources: per_worker
                .into_iter()
                .map(|readers| Some(ReadSource::Ranges { readers, current: 0 }))
                .collect(),
            feeder: None,
        })
    }

    /// Paired input: files come in twos and must be read in lockstep, so
    /// the feeder fallback is always used.
    pub fn paired(inputs: &[InputFile], n_workers: usize) -> io::Result<ReaderSupplier> {
        debug_assert!(inputs.len() % 2 == 0);
        Self::feed(inputs.to_vec(), n_workers, true)
    }

    fn feed(inputs: Vec<InputFile>, n_workers: usize, paired: bool) -> io::Result<ReaderSupplier> {
        let (tx, rx) = bounded(FEEDER_CHANNEL_CAPACITY);
        let feeder = thread::Builder::new()
            .name("read-feeder".to_string())
            .spawn(move || {
                if paired {
                    feed_pairs(&inputs, &tx);
                } else {
                    feed_singles(&inputs, &tx);
                }
            })?;
        Ok(ReaderSupplier {
            sources: (0..n_workers)
                .map(|_| Some(ReadSource::Channel(rx.clone())))
                .collect(),
            feeder: Some(feeder),
        })
    }

    /// Take worker `idx`'s reader. Each may be taken exactly once.
    pub fn take_reader(&mut self, idx: usize) -> ReadSource {
        self.sources[idx]
            .take()
            .expect("reader already taken for this worker")
    }

    /// Join the feeder thread, if one is running.
    pub fn finish(mut self) {
        // Drop remaining receivers so a blocked feeder unblocks.
        self.sources.clear();
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
    }
}

fn open_decoded(input: &InputFile) -> io::Result<Box<dyn io::Read + Send>> {
    if input.is_stdio() {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(&input.path)?;
    if input.is_compressed() {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn record_to_read(record: &fastq::Record) -> Read {
    Read::new(
        record.id().to_string(),
        record.seq().to_vec(),
        record.qual().to_vec(),
    )
}

fn feed_singles(inputs: &[InputFile], tx: &Sender<io::Result<ReadItem>>) {
    for input in inputs {
        let reader = match open_decoded(input) {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };
        for record in fastq::Reader::new(reader).records() {
            let item = record
                .map(|r| ReadItem::Single(record_to_read(&r)))
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
            let failed = item.is_err();
            if tx.send(item).is_err() || failed {
                return;
            }
        }
    }
}

fn feed_pairs(inputs: &[InputFile], tx: &Sender<io::Result<ReadItem>>) {
    for pair in inputs.chunks_exact(2) {
        let (r0, r1) = match (open_decoded(&pair[0]), open_decoded(&pair[1])) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                let _ = tx.send(Err(e));
                return;
            }
        };
        let mut records0 = fastq::Reader::new(r0).records();
        let mut records1 = fastq::Reader::new(r1).records();
        loop {
            let item = match (records0.next(), records1.next()) {
                (None, None) => break,
                (Some(Ok(a)), Some(Ok(b))) => {
                    Ok(ReadItem::Pair(record_to_read(&a), record_to_read(&b)))
                }
                (Some(Err(e)), _) | (_, Some(Err(e))) => {
                    Err(io::Error::new(io::ErrorKind::Other, e))
                }
                _ => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "paired files {} and {} have different read counts",
                        pair[0].path, pair[1].path
                    ),
                )),
            };
            let failed = item.is_err();
            if tx.send(item).is_err() || failed {
                return;
            }
        }
    }
}

/// Reads FASTQ records whose header offsets fall inside [start, end),
/// resynchronizing to the first record boundary at or after `start`.
pub struct RangeReader {
    path: PathBuf,
    start: u64,
    end: u64,
    state: Option<RangeState>,
    done: bool,
}

struct RangeState {
    reader: BufReader<File>,
    /// Absolute offset of the next unread byte.
    pos: u64,
    /// Lines read ahead during resynchronization.
    lookahead: std::collections::VecDeque<String>,
}

impl RangeReader {
    pub fn new(path: PathBuf, start: u64, end: u64) -> RangeReader {
        RangeReader {
            path,
            start,
            end,
            state: None,
            done: false,
        }
    }

    pub fn next_read(&mut self) -> Option<io::Result<Read>> {
        if self.done {
            return None;
        }
        if self.state.is_none() {
            match self.open() {
                Ok(state) => self.state = Some(state),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        match self.parse_record() {
            Ok(Some(read)) => Some(Ok(read)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    fn open(&self) -> io::Result<RangeState> {
        let mut file = File::open(&self.path)?;
        // Seek one byte short of the partition so a partition landing
        // exactly on a line boundary keeps that line: discarding "the
        // partial line" then consumes only the preceding newline.
        let seek_to = if self.start > 0 { self.start - 1 } else { 0 };
        file.seek(SeekFrom::Start(seek_to))?;
        let mut state = RangeState {
            reader: BufReader::new(file),
            pos: seek_to,
            lookahead: std::collections::VecDeque::new(),
        };
        if self.start > 0 {
            // Drop the partial line we landed in, then scan for a header:
            // a line starting with '@' whose second successor starts with
            // '+'. Quality lines may start with '@' too; they fail the
            // '+' check and the scan moves on.
            let mut partial = String::new();
            read_line_counted(&mut state.reader, &mut partial, &mut state.pos)?;
            loop {
                while state.lookahead.len() < 3 {
                    let mut line = String::new();
                    if read_line_counted(&mut state.reader, &mut line, &mut state.pos)? == 0 {
                        return Ok(state); // EOF inside the partition
                    }
                    state.lookahead.push_back(line);
                }
                let is_header = state.lookahead[0].starts_with('@')
                    && state.lookahead[2].starts_with('+');
                if is_header {
                    break;
                }
                state.lookahead.pop_front();
            }
        }
        Ok(state)
    }

    fn parse_record(&mut self) -> io::Result<Option<Read>> {
        let state = self.state.as_mut().expect("range reader not opened");
        // Offset of the record header about to be read.
        let lookahead_bytes: u64 = state.lookahead.iter().map(|l| l.len() as u64).sum();
        let header_offset = state.pos - lookahead_bytes;
        if header_offset >= self.end {
            return Ok(None);
        }

        let mut lines = [(); 4].map(|_| String::new());
        for line in lines.iter_mut() {
            match state.lookahead.pop_front() {
                Some(l) => *line = l,
                None => {
                    if read_line_counted(&mut state.reader, line, &mut state.pos)? == 0 {
                        return Ok(None); // clean EOF only before a record
                    }
                }
            }
        }

        let header = lines[0].trim_end();
        if !header.starts_with('@') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed FASTQ record at byte {} of {}", header_offset, self.path.display()),
            ));
        }
        let id = header[1..]
            .split_ascii_whitespace()
            .next()
            .unwrap_or("")
            .to_string();
        let bases = lines[1].trim_end().as_bytes().to_vec();
        let quals = lines[3].trim_end().as_bytes().to_vec();
        if bases.len() != quals.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sequence/quality length mismatch for read {}", id),
            ));
        }
        Ok(Some(Read::new(id, bases, quals)))
    }
}

fn read_line_counted(
    reader: &mut BufReader<File>,
    line: &mut String,
    pos: &mut u64,
) -> io::Result<usize> {
    let n = reader.read_line(line)?;
    *pos += n as u64;
    Ok(n)
}
