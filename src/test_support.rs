//! Builders for synthetic binary XML documents, resource tables and ZIP
//! archives used across the test modules.

use std::io::Write;

use crate::chunk::{
    CHUNK_AXML_FILE, CHUNK_RESOURCE_IDS, CHUNK_STRING_POOL, CHUNK_TABLE, CHUNK_TABLE_LIBRARY,
    CHUNK_TABLE_PACKAGE, CHUNK_TABLE_TYPE, CHUNK_TABLE_TYPE_SPEC, CHUNK_XML_TAG_END,
    CHUNK_XML_TAG_START, CHUNK_XML_TEXT, NO_ENTRY,
};
use crate::resource_table::ResourceTable;
use crate::string_pool::STRING_FLAG_UTF8;
use crate::value::AttrType;

pub const NO_RAW: u32 = NO_ENTRY;

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

// A chunk with a placeholder size, patched when the body is known.
fn chunk(id: u16, header_size: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    push_u16(&mut out, id);
    push_u16(&mut out, header_size);
    push_u32(&mut out, (8 + body.len()) as u32);
    out.extend_from_slice(body);
    out
}

fn utf8_pool_chunk(strings: &[String]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut offsets = Vec::new();
    for s in strings {
        offsets.push(data.len() as u32);
        data.push(s.chars().count() as u8);
        data.push(s.len() as u8);
        data.extend_from_slice(s.as_bytes());
        data.push(0);
    }
    while data.len() % 4 != 0 {
        data.push(0);
    }

    let mut body = Vec::new();
    push_u32(&mut body, strings.len() as u32);
    push_u32(&mut body, 0); // style count
    push_u32(&mut body, STRING_FLAG_UTF8);
    push_u32(&mut body, 7 * 4 + 4 * strings.len() as u32);
    push_u32(&mut body, 0); // styles offset
    for off in offsets {
        push_u32(&mut body, off);
    }
    body.extend_from_slice(&data);
    chunk(CHUNK_STRING_POOL, 28, &body)
}

fn utf16_name_bytes(name: &str) -> [u8; 256] {
    let mut raw = [0u8; 256];
    for (i, unit) in name.encode_utf16().take(127).enumerate() {
        raw[2 * i..2 * i + 2].copy_from_slice(&unit.to_le_bytes());
    }
    raw
}

/// A tag-start attribute record for [`AxmlBuilder`].
#[derive(Clone, Copy)]
pub struct TestAttr {
    pub name_idx: u32,
    pub data_type: AttrType,
    pub raw_idx: u32,
    pub data: u32,
}

pub fn attr(name_idx: u32, data_type: AttrType, raw_idx: u32, data: u32) -> TestAttr {
    TestAttr {
        name_idx,
        data_type,
        raw_idx,
        data,
    }
}

fn attr_type_raw(data_type: AttrType) -> u8 {
    match data_type {
        AttrType::Null => 0x00,
        AttrType::Reference => 0x01,
        AttrType::Attribute => 0x02,
        AttrType::String => 0x03,
        AttrType::Float => 0x04,
        AttrType::IntDec => 0x10,
        AttrType::IntHex => 0x11,
        AttrType::IntBool => 0x12,
        AttrType::IntColorArgb8 => 0x1c,
        AttrType::IntColorRgb8 => 0x1d,
        AttrType::IntColorArgb4 => 0x1e,
        AttrType::IntColorRgb4 => 0x1f,
        AttrType::Unknown(raw) => raw,
    }
}

/// Builds compiled binary XML documents chunk by chunk.
pub struct AxmlBuilder {
    strings: Vec<String>,
    resource_ids: Vec<u32>,
    body: Vec<u8>,
}

impl AxmlBuilder {
    pub fn new(strings: &[&str]) -> Self {
        AxmlBuilder {
            strings: strings.iter().map(|s| s.to_string()).collect(),
            resource_ids: Vec::new(),
            body: Vec::new(),
        }
    }

    fn string_index(&self, text: &str) -> u32 {
        self.strings
            .iter()
            .position(|s| s == text)
            .expect("string not in pool") as u32
    }

    pub fn resource_ids(mut self, ids: &[u32]) -> Self {
        self.resource_ids = ids.to_vec();
        self
    }

    pub fn tag_start(mut self, name: &str, attrs: &[TestAttr]) -> Self {
        let name_idx = self.string_index(name);
        let mut body = Vec::new();
        push_u32(&mut body, 0); // line number
        push_u32(&mut body, NO_ENTRY); // comment
        push_u32(&mut body, NO_ENTRY); // namespace
        push_u32(&mut body, name_idx);
        push_u16(&mut body, 20); // attrStart
        push_u16(&mut body, 20); // attrSize
        push_u16(&mut body, attrs.len() as u16);
        push_u16(&mut body, 0); // idIndex
        push_u16(&mut body, 0); // classIndex
        push_u16(&mut body, 0); // styleIndex
        for a in attrs {
            push_u32(&mut body, NO_ENTRY); // namespace
            push_u32(&mut body, a.name_idx);
            push_u32(&mut body, a.raw_idx);
            push_u16(&mut body, 8);
            body.push(0); // res0
            body.push(attr_type_raw(a.data_type));
            push_u32(&mut body, a.data);
        }
        self.body.extend_from_slice(&chunk(CHUNK_XML_TAG_START, 16, &body));
        self
    }

    pub fn tag_end(mut self, name: &str) -> Self {
        let name_idx = self.string_index(name);
        let mut body = Vec::new();
        push_u32(&mut body, 0);
        push_u32(&mut body, NO_ENTRY);
        push_u32(&mut body, NO_ENTRY);
        push_u32(&mut body, name_idx);
        self.body.extend_from_slice(&chunk(CHUNK_XML_TAG_END, 16, &body));
        self
    }

    pub fn text(mut self, idx: u32) -> Self {
        let mut body = Vec::new();
        push_u32(&mut body, 0);
        push_u32(&mut body, NO_ENTRY);
        push_u32(&mut body, idx);
        body.extend_from_slice(&[0u8; 8]); // unused typed value
        self.body.extend_from_slice(&chunk(CHUNK_XML_TEXT, 16, &body));
        self
    }

    pub fn raw_chunk(mut self, id: u16, payload: &[u8]) -> Self {
        self.body.extend_from_slice(&chunk(id, 8, payload));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut inner = utf8_pool_chunk(&self.strings);
        if !self.resource_ids.is_empty() {
            let mut ids = Vec::new();
            for id in &self.resource_ids {
                push_u32(&mut ids, *id);
            }
            inner.extend_from_slice(&chunk(CHUNK_RESOURCE_IDS, 8, &ids));
        }
        inner.extend_from_slice(&self.body);
        chunk(CHUNK_AXML_FILE, 8, &inner)
    }
}

/// One entry slot inside a [`PackageBuilder`] configuration.
#[derive(Clone)]
pub enum EntrySpec {
    Absent {
        entry_id: u16,
    },
    Simple {
        entry_id: u16,
        key_idx: u32,
        data_type: AttrType,
        data: u32,
    },
    Bag {
        entry_id: u16,
        key_idx: u32,
        items: Vec<(u32, AttrType, u32)>,
    },
}

impl EntrySpec {
    fn entry_id(&self) -> u16 {
        match self {
            EntrySpec::Absent { entry_id }
            | EntrySpec::Simple { entry_id, .. }
            | EntrySpec::Bag { entry_id, .. } => *entry_id,
        }
    }
}

pub fn simple_entry(entry_id: u16, key_idx: u32, data_type: AttrType, data: u32) -> EntrySpec {
    EntrySpec::Simple {
        entry_id,
        key_idx,
        data_type,
        data,
    }
}

pub fn absent_entry(entry_id: u16) -> EntrySpec {
    EntrySpec::Absent { entry_id }
}

pub fn bag_entry(entry_id: u16, key_idx: u32, items: &[(u32, AttrType, u32)]) -> EntrySpec {
    EntrySpec::Bag {
        entry_id,
        key_idx,
        items: items.to_vec(),
    }
}

/// A `ResTable_config` record: density and SDK version are the two fields
/// the selection rules look at.
pub fn cfg(density: u16, sdk: u16) -> Vec<u8> {
    let mut body = Vec::new();
    push_u32(&mut body, 28); // size
    push_u16(&mut body, 0); // mcc
    push_u16(&mut body, 0); // mnc
    body.extend_from_slice(&[0; 4]); // language, country
    body.push(0); // orientation
    body.push(0); // touchscreen
    push_u16(&mut body, density);
    body.extend_from_slice(&[0; 4]); // keyboard, navigation, inputFlags, pad
    push_u16(&mut body, 0); // screenWidth
    push_u16(&mut body, 0); // screenHeight
    push_u16(&mut body, sdk);
    push_u16(&mut body, 0); // minorVersion
    body
}

#[derive(Default)]
pub struct PackageBuilder {
    type_names: Vec<String>,
    key_names: Vec<String>,
    configs: Vec<(Vec<u8>, Vec<EntrySpec>)>,
    libraries: Vec<(u32, String)>,
}

impl PackageBuilder {
    pub fn type_name(&mut self, name: &str) -> &mut Self {
        self.type_names.push(name.to_string());
        self
    }

    pub fn key_name(&mut self, name: &str) -> &mut Self {
        self.key_names.push(name.to_string());
        self
    }

    pub fn config(&mut self, config: Vec<u8>, entries: &[EntrySpec]) -> &mut Self {
        self.configs.push((config, entries.to_vec()));
        self
    }

    pub fn library(&mut self, package_id: u32, name: &str) -> &mut Self {
        self.libraries.push((package_id, name.to_string()));
        self
    }

    // All entries live in type id 1 (the first declared type name).
    fn build(&self, package_id: u8, package_name: &str) -> Vec<u8> {
        let type_pool = utf8_pool_chunk(&self.type_names);
        let key_pool = utf8_pool_chunk(&self.key_names);

        let entry_count = self
            .configs
            .iter()
            .flat_map(|(_, entries)| entries.iter())
            .map(|spec| spec.entry_id() as u32 + 1)
            .max()
            .unwrap_or(0);

        let mut chunks = Vec::new();
        chunks.extend_from_slice(&type_pool);
        chunks.extend_from_slice(&key_pool);

        // Type spec for type 1.
        let mut spec_body = Vec::new();
        spec_body.push(1);
        spec_body.push(0);
        push_u16(&mut spec_body, 0);
        push_u32(&mut spec_body, entry_count);
        for _ in 0..entry_count {
            push_u32(&mut spec_body, 0);
        }
        chunks.extend_from_slice(&chunk(CHUNK_TABLE_TYPE_SPEC, 16, &spec_body));

        for (config, entries) in &self.configs {
            chunks.extend_from_slice(&type_chunk(config, entries, entry_count));
        }

        if !self.libraries.is_empty() {
            let mut lib_body = Vec::new();
            push_u32(&mut lib_body, self.libraries.len() as u32);
            for (id, name) in &self.libraries {
                push_u32(&mut lib_body, *id);
                lib_body.extend_from_slice(&utf16_name_bytes(name));
            }
            chunks.extend_from_slice(&chunk(CHUNK_TABLE_LIBRARY, 12, &lib_body));
        }

        let mut body = Vec::new();
        push_u32(&mut body, u32::from(package_id));
        body.extend_from_slice(&utf16_name_bytes(package_name));
        push_u32(&mut body, 288); // type strings offset
        push_u32(&mut body, self.type_names.len() as u32);
        push_u32(&mut body, 288 + type_pool.len() as u32); // key strings offset
        push_u32(&mut body, self.key_names.len() as u32);
        push_u32(&mut body, 0); // type id offset
        body.extend_from_slice(&chunks);
        chunk(CHUNK_TABLE_PACKAGE, 288, &body)
    }
}

fn type_chunk(config: &[u8], entries: &[EntrySpec], entry_count: u32) -> Vec<u8> {
    let mut blob = Vec::new();
    let mut offsets = vec![NO_ENTRY; entry_count as usize];
    for spec in entries {
        match spec {
            EntrySpec::Absent { .. } => {}
            EntrySpec::Simple {
                entry_id,
                key_idx,
                data_type,
                data,
            } => {
                offsets[*entry_id as usize] = blob.len() as u32;
                push_u16(&mut blob, 8); // entry header size
                push_u16(&mut blob, 0); // flags
                push_u32(&mut blob, *key_idx);
                push_u16(&mut blob, 8); // value size
                blob.push(0);
                blob.push(attr_type_raw(*data_type));
                push_u32(&mut blob, *data);
            }
            EntrySpec::Bag {
                entry_id,
                key_idx,
                items,
            } => {
                offsets[*entry_id as usize] = blob.len() as u32;
                push_u16(&mut blob, 16);
                push_u16(&mut blob, 0x0001); // FLAG_COMPLEX
                push_u32(&mut blob, *key_idx);
                push_u32(&mut blob, 0); // parent
                push_u32(&mut blob, items.len() as u32);
                for (name, data_type, data) in items {
                    push_u32(&mut blob, *name);
                    push_u16(&mut blob, 8);
                    blob.push(0);
                    blob.push(attr_type_raw(*data_type));
                    push_u32(&mut blob, *data);
                }
            }
        }
    }

    let header_size = 20 + config.len();
    let entries_start = header_size + 4 * entry_count as usize;
    let mut body = Vec::new();
    body.push(1); // type id
    body.push(0); // flags
    push_u16(&mut body, 0); // reserved
    push_u32(&mut body, entry_count);
    push_u32(&mut body, entries_start as u32);
    body.extend_from_slice(config);
    for off in &offsets {
        push_u32(&mut body, *off);
    }
    body.extend_from_slice(&blob);
    chunk(CHUNK_TABLE_TYPE, header_size as u16, &body)
}

/// Builds `resources.arsc` images with one or more packages.
pub struct ArscBuilder {
    values: Vec<String>,
    raw_chunks: Vec<Vec<u8>>,
    packages: Vec<Vec<u8>>,
}

impl ArscBuilder {
    pub fn new(values: &[&str]) -> Self {
        ArscBuilder {
            values: values.iter().map(|s| s.to_string()).collect(),
            raw_chunks: Vec::new(),
            packages: Vec::new(),
        }
    }

    pub fn raw_table_chunk(mut self, id: u16, payload: &[u8]) -> Self {
        self.raw_chunks.push(chunk(id, 8, payload));
        self
    }

    pub fn package(
        mut self,
        package_id: u8,
        name: &str,
        configure: impl FnOnce(&mut PackageBuilder),
    ) -> Self {
        let mut builder = PackageBuilder::default();
        configure(&mut builder);
        self.packages.push(builder.build(package_id, name));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut inner = utf8_pool_chunk(&self.values);
        for raw in &self.raw_chunks {
            inner.extend_from_slice(raw);
        }
        for package in &self.packages {
            inner.extend_from_slice(package);
        }

        let mut body = Vec::new();
        push_u32(&mut body, self.packages.len() as u32);
        body.extend_from_slice(&inner);
        chunk(CHUNK_TABLE, 12, &body)
    }

    pub fn parse(self) -> ResourceTable {
        ResourceTable::parse(&self.build()).expect("synthetic table parses")
    }
}

/// Builds stored/deflated ZIP archives, optionally without a central
/// directory so the fallback scanner has to find the entries.
pub struct ZipBuilder {
    entries: Vec<(String, Vec<u8>, Vec<u8>, u16)>, // name, raw, stored bytes, method
}

impl ZipBuilder {
    pub fn new() -> Self {
        ZipBuilder {
            entries: Vec::new(),
        }
    }

    pub fn add(mut self, name: &str, data: &[u8]) -> Self {
        self.entries
            .push((name.to_string(), data.to_vec(), data.to_vec(), 0));
        self
    }

    pub fn add_deflated(mut self, name: &str, data: &[u8]) -> Self {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();
        self.entries
            .push((name.to_string(), data.to_vec(), compressed, 8));
        self
    }

    /// Adds an entry whose central-directory method is bogus; the reader
    /// must normalize it.
    pub fn add_with_method(mut self, name: &str, data: &[u8], method: u16) -> Self {
        self.entries
            .push((name.to_string(), data.to_vec(), data.to_vec(), method));
        self
    }

    fn locals(&self) -> (Vec<u8>, Vec<u32>) {
        let mut out = Vec::new();
        let mut offsets = Vec::new();
        for (name, raw, stored, method) in &self.entries {
            offsets.push(out.len() as u32);
            push_u32(&mut out, 0x0403_4B50);
            push_u16(&mut out, 20); // version needed
            push_u16(&mut out, 0); // flags
            push_u16(&mut out, *method);
            push_u16(&mut out, 0); // time
            push_u16(&mut out, 0); // date
            push_u32(&mut out, crc32(raw));
            push_u32(&mut out, stored.len() as u32);
            push_u32(&mut out, raw.len() as u32);
            push_u16(&mut out, name.len() as u16);
            push_u16(&mut out, 0); // extra len
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(stored);
        }
        (out, offsets)
    }

    pub fn build(self) -> Vec<u8> {
        let (mut out, offsets) = self.locals();
        let central_start = out.len() as u32;
        for ((name, raw, stored, method), offset) in self.entries.iter().zip(&offsets) {
            push_u32(&mut out, 0x0201_4B50);
            push_u16(&mut out, 20);
            push_u16(&mut out, 20);
            push_u16(&mut out, 0);
            push_u16(&mut out, *method);
            push_u16(&mut out, 0);
            push_u16(&mut out, 0);
            push_u32(&mut out, crc32(raw));
            push_u32(&mut out, stored.len() as u32);
            push_u32(&mut out, raw.len() as u32);
            push_u16(&mut out, name.len() as u16);
            push_u16(&mut out, 0);
            push_u16(&mut out, 0);
            push_u16(&mut out, 0);
            push_u16(&mut out, 0);
            push_u32(&mut out, 0);
            push_u32(&mut out, *offset);
            out.extend_from_slice(name.as_bytes());
        }
        let central_size = out.len() as u32 - central_start;
        push_u32(&mut out, 0x0605_4B50);
        push_u16(&mut out, 0);
        push_u16(&mut out, 0);
        push_u16(&mut out, self.entries.len() as u16);
        push_u16(&mut out, self.entries.len() as u16);
        push_u32(&mut out, central_size);
        push_u32(&mut out, central_start);
        push_u16(&mut out, 0);
        out
    }

    /// Local file headers only; the central directory is missing entirely.
    pub fn build_without_central(self) -> Vec<u8> {
        self.locals().0
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = flate2::Crc::new();
    hasher.update(data);
    hasher.sum()
}

static TEMP_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// An anonymous temporary file holding `bytes`, for the archive readers.
pub fn temp_file(bytes: &[u8]) -> std::fs::File {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "apkdec-test-{}-{:x}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    ));
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(&path)
        .expect("create temp file");
    std::fs::remove_file(&path).ok();
    file.write_all(bytes).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}
