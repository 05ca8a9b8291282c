use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::{Decompress, FlushDecompress, Status};
use log::warn;
use once_cell::sync::Lazy;
use ::zip::{CompressionMethod, ZipArchive};

use crate::error::{ParseError, ParseResult};

const LOCAL_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

const SCAN_BUFFER_SIZE: usize = 64 * 1024;
const INFLATE_BUFFER_SIZE: usize = 32 * 1024;
const INFLATER_POOL_CAP: usize = 8;

// One payload location for an entry name. Broken archives carry several.
#[derive(Clone, Copy, Debug)]
struct SubEntry {
    offset: u64,
    method: u16,
    // Known on the central-directory path, unknown when scanning.
    compressed_size: Option<u64>,
}

/// A named entry, possibly backed by several physical records.
pub struct ZipEntry {
    pub name: String,
    pub is_dir: bool,
    subs: Vec<SubEntry>,
}

/// A ZIP archive reader that accepts what Android accepts.
///
/// The standard central directory is tried first; when that fails (or
/// panics on crafted input), the file is scanned forward for local file
/// headers instead, so adversarially malformed archives still yield their
/// `AndroidManifest.xml` and `resources.arsc`.
pub struct Zip {
    file: File,
    entries: Vec<ZipEntry>,
    index: HashMap<String, usize>,
}

impl Zip {
    pub fn open(path: impl AsRef<Path>) -> ParseResult<Zip> {
        Zip::from_file(File::open(path)?)
    }

    pub fn from_file(mut file: File) -> ParseResult<Zip> {
        let entries = match read_central_directory(&mut file) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("central directory parse failed ({err}); scanning for local headers");
                scan_local_headers(&mut file)?
            }
        };

        let mut index = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            index.entry(entry.name.clone()).or_insert(i);
        }
        Ok(Zip {
            file,
            entries,
            index,
        })
    }

    /// Entry names in discovery order.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Prepares a reader over the entry. Call [`ZipEntryFile::open`], then
    /// alternate [`Read`] and [`ZipEntryFile::next`] to walk every record
    /// stored under this name.
    pub fn by_name(&self, name: &str) -> Option<ZipEntryFile<'_>> {
        let &idx = self.index.get(name)?;
        let entry = &self.entries[idx];
        Some(ZipEntryFile {
            entry,
            file: &self.file,
            opened: false,
            cur: None,
            stream: None,
        })
    }
}

/// Reader over all physical records sharing one entry name.
pub struct ZipEntryFile<'a> {
    entry: &'a ZipEntry,
    file: &'a File,
    opened: bool,
    // None before the first `next`; Some(subs.len()) once exhausted.
    cur: Option<usize>,
    stream: Option<EntryStream<'a>>,
}

impl<'a> ZipEntryFile<'a> {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn open(&mut self) -> ParseResult<()> {
        if self.opened {
            return Err(ParseError::AlreadyOpen);
        }
        self.opened = true;
        self.cur = None;
        Ok(())
    }

    /// Advances to the next record stored under this name. Returns false
    /// when all records are exhausted.
    pub fn next(&mut self) -> bool {
        self.stream = None;
        let next = self.cur.map_or(0, |c| c + 1);
        self.cur = Some(next.min(self.entry.subs.len()));
        next < self.entry.subs.len()
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.opened = false;
    }

    /// Opens the file, reads the first record that yields data (up to
    /// `limit` bytes) and closes it. The last error is returned only when
    /// every record fails.
    pub fn read_all(&mut self, limit: u64) -> ParseResult<Vec<u8>> {
        self.open()?;
        let mut last_err: Option<ParseError> = None;
        while self.next() {
            let mut data = Vec::new();
            match Read::take(&mut *self, limit).read_to_end(&mut data) {
                Ok(_) => {
                    self.close();
                    return Ok(data);
                }
                Err(err) => last_err = Some(err.into()),
            }
        }
        self.close();
        Err(last_err
            .unwrap_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof).into()))
    }

    fn ensure_stream(&mut self) -> io::Result<&mut EntryStream<'a>> {
        if self.stream.is_none() {
            if self.cur.is_none() && !self.next() {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let cur = self.cur.unwrap_or(0);
            if cur >= self.entry.subs.len() {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let sub = self.entry.subs[cur];
            self.file.seek(SeekFrom::Start(sub.offset))?;
            self.stream = Some(match sub.method {
                METHOD_STORE => {
                    let limit = sub.compressed_size.unwrap_or(u64::MAX);
                    EntryStream::Stored(Read::take(self.file, limit))
                }
                // Android treats every other method as deflate.
                _ => EntryStream::Deflate(InflateStream::new(self.file)),
            });
        }
        Ok(self.stream.as_mut().expect("stream just created"))
    }
}

impl Read for ZipEntryFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.ensure_stream()? {
            EntryStream::Stored(inner) => inner.read(buf),
            EntryStream::Deflate(inner) => inner.read(buf),
        }
    }
}

enum EntryStream<'a> {
    Stored(io::Take<&'a File>),
    Deflate(InflateStream<'a>),
}

// Streaming raw-deflate reader whose decompressor state comes from a
// process-wide pool.
struct InflateStream<'a> {
    src: &'a File,
    decomp: Option<Decompress>,
    in_buf: Box<[u8]>,
    in_start: usize,
    in_end: usize,
    src_eof: bool,
    done: bool,
}

static INFLATER_POOL: Lazy<Mutex<Vec<Decompress>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn acquire_inflater() -> Decompress {
    if let Ok(mut pool) = INFLATER_POOL.lock() {
        if let Some(mut decomp) = pool.pop() {
            decomp.reset(false);
            return decomp;
        }
    }
    Decompress::new(false)
}

fn release_inflater(decomp: Decompress) {
    if let Ok(mut pool) = INFLATER_POOL.lock() {
        if pool.len() < INFLATER_POOL_CAP {
            pool.push(decomp);
        }
    }
}

impl<'a> InflateStream<'a> {
    fn new(src: &'a File) -> Self {
        InflateStream {
            src,
            decomp: Some(acquire_inflater()),
            in_buf: vec![0u8; INFLATE_BUFFER_SIZE].into_boxed_slice(),
            in_start: 0,
            in_end: 0,
            src_eof: false,
            done: false,
        }
    }
}

impl Read for InflateStream<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || self.done {
            return Ok(0);
        }
        let decomp = self
            .decomp
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "read after close"))?;

        loop {
            if self.in_start == self.in_end && !self.src_eof {
                let n = self.src.read(&mut self.in_buf)?;
                self.in_start = 0;
                self.in_end = n;
                self.src_eof = n == 0;
            }

            let before_in = decomp.total_in();
            let before_out = decomp.total_out();
            let status = decomp
                .decompress(
                    &self.in_buf[self.in_start..self.in_end],
                    out,
                    FlushDecompress::None,
                )
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            self.in_start += (decomp.total_in() - before_in) as usize;
            let produced = (decomp.total_out() - before_out) as usize;

            match status {
                Status::StreamEnd => {
                    self.done = true;
                    return Ok(produced);
                }
                _ if produced > 0 => return Ok(produced),
                _ if self.src_eof && self.in_start == self.in_end => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated deflate stream",
                    ));
                }
                _ => {}
            }
        }
    }
}

impl Drop for InflateStream<'_> {
    fn drop(&mut self) {
        if let Some(decomp) = self.decomp.take() {
            release_inflater(decomp);
        }
    }
}

fn read_central_directory(file: &mut File) -> ParseResult<Vec<ZipEntry>> {
    // The zip crate can panic on crafted central directories; treat that
    // the same as a parse failure so the caller falls back to scanning.
    let outcome = catch_unwind(AssertUnwindSafe(|| -> ParseResult<Vec<ZipEntry>> {
        let mut archive = ZipArchive::new(&mut *file)
            .map_err(|err| ParseError::malformed(format!("zip central directory: {err}")))?;

        let mut entries: Vec<ZipEntry> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for i in 0..archive.len() {
            let record = archive
                .by_index_raw(i)
                .map_err(|err| ParseError::malformed(format!("zip entry {i}: {err}")))?;
            let is_dir = record.is_dir();
            let name = clean_name(record.name());
            let mut method = method_code(record.compression());
            let mut compressed_size = record.compressed_size();

            // Android treats unknown methods as deflate, except for the two
            // files it maps directly; those are read as stored with the
            // compressed size forced to the uncompressed size.
            if method != METHOD_STORE && method != METHOD_DEFLATE {
                if name == "AndroidManifest.xml" || name == "resources.arsc" {
                    method = METHOD_STORE;
                    compressed_size = record.size();
                } else {
                    method = METHOD_DEFLATE;
                }
            }

            if !index.contains_key(&name) {
                index.insert(name.clone(), entries.len());
                entries.push(ZipEntry {
                    name,
                    is_dir,
                    subs: vec![SubEntry {
                        offset: record.data_start(),
                        method,
                        compressed_size: Some(compressed_size),
                    }],
                });
            }
        }
        Ok(entries)
    }));

    match outcome {
        Ok(result) => result,
        Err(_) => Err(ParseError::malformed(
            "panic while reading zip central directory",
        )),
    }
}

fn method_code(method: CompressionMethod) -> u16 {
    match method {
        CompressionMethod::Stored => METHOD_STORE,
        CompressionMethod::Deflated => METHOD_DEFLATE,
        other => match other {
            CompressionMethod::Unsupported(code) => code,
            _ => 0xFFFF,
        },
    }
}

// Forward scan for local file headers, the recovery path for archives whose
// central directory is damaged. Later records under the same name are
// prepended so they are tried first.
fn scan_local_headers(file: &mut File) -> ParseResult<Vec<ZipEntry>> {
    file.seek(SeekFrom::Start(0))?;

    let mut entries: Vec<ZipEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut search_from = 0u64;

    while let Some(offset) = find_next_header(file, search_from)? {
        file.seek(SeekFrom::Start(offset + 8))?;
        let method = file.read_u16::<LittleEndian>()?;
        file.seek(SeekFrom::Start(offset + 26))?;
        let name_len = file.read_u16::<LittleEndian>()?;
        let extra_len = file.read_u16::<LittleEndian>()?;

        let mut name_buf = vec![0u8; name_len as usize];
        file.seek(SeekFrom::Start(offset + 30))?;
        file.read_exact(&mut name_buf)?;

        let name = clean_name(&String::from_utf8_lossy(&name_buf));
        let sub = SubEntry {
            offset: offset + 30 + u64::from(name_len) + u64::from(extra_len),
            method,
            compressed_size: None,
        };

        match index.get(&name) {
            Some(&i) => entries[i].subs.insert(0, sub),
            None => {
                index.insert(name.clone(), entries.len());
                entries.push(ZipEntry {
                    name,
                    is_dir: false,
                    subs: vec![sub],
                });
            }
        }

        search_from = offset + 4;
    }

    Ok(entries)
}

fn find_next_header(file: &mut File, from: u64) -> ParseResult<Option<u64>> {
    file.seek(SeekFrom::Start(from))?;

    let mut buf = vec![0u8; SCAN_BUFFER_SIZE];
    let mut matched = 0usize;
    let mut offset = from;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        for (i, &byte) in buf[..n].iter().enumerate() {
            if byte == LOCAL_HEADER_SIGNATURE[matched] {
                matched += 1;
                if matched == LOCAL_HEADER_SIGNATURE.len() {
                    return Ok(Some(offset + i as u64 - (LOCAL_HEADER_SIGNATURE.len() as u64 - 1)));
                }
            } else {
                matched = if byte == LOCAL_HEADER_SIGNATURE[0] { 1 } else { 0 };
            }
        }
        offset += n as u64;
    }
}

// Lexical path cleanup, the shape `path.Clean` gives entry names.
fn clean_name(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
