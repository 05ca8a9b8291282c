use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};

use bitflags::bitflags;
use log::warn;

use crate::chunk::{
    BinaryReader, ChunkHeader, CHUNK_HEADER_SIZE, CHUNK_STRING_POOL, CHUNK_TABLE,
    CHUNK_TABLE_LIBRARY, CHUNK_TABLE_PACKAGE, CHUNK_TABLE_TYPE, CHUNK_TABLE_TYPE_SPEC, NO_ENTRY,
};
use crate::error::{ParseError, ParseResult};
use crate::string_pool::StringPool;
use crate::value::{AttrType, ResValue};

// SDK level configurations are matched against when the caller has no
// particular device in mind.
const DEFAULT_SDK: u16 = 255;

// Reference chains can cycle between packages; chasing stops here.
const MAX_REFERENCE_HOPS: u32 = 5;

bitflags! {
    /// Flag word carried by every resource entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u16 {
        /// The entry is a bag of (name, value) pairs.
        const COMPLEX = 0x0001;
        /// The entry is visible to other packages.
        const PUBLIC = 0x0002;
    }
}

const TYPE_FLAG_SPARSE: u8 = 0x01;
const TYPE_FLAG_OFFSET16: u8 = 0x02;

/// One configuration selector tuple from a `TABLE_TYPE` chunk.
///
/// Only the fields the resolver ranks on are named; the record is
/// size-prefixed and unknown trailing fields are skipped.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub mcc: u16,
    pub mnc: u16,
    pub language: String,
    pub country: String,
    pub orientation: u8,
    pub touchscreen: u8,
    pub density: u16,
    pub keyboard: u8,
    pub navigation: u8,
    pub input_flags: u8,
    pub screen_width: u16,
    pub screen_height: u16,
    pub sdk_version: u16,
    pub minor_version: u16,
    pub screen_layout: u8,
    pub ui_mode: u8,
    pub smallest_screen_width_dp: u16,
    pub screen_width_dp: u16,
    pub screen_height_dp: u16,
}

impl Config {
    fn parse(r: &mut BinaryReader<'_>) -> ParseResult<Config> {
        let start = r.position();
        let size = r.read_u32()? as usize;
        if size < 4 || start + size > r.data.len() {
            return Err(ParseError::malformed("invalid configuration size"));
        }

        // Older tables ship shorter records; absent fields read as zero.
        let mut cr = FieldReader::new(&r.data[start + 4..start + size]);
        let mut config = Config::default();
        config.mcc = cr.u16();
        config.mnc = cr.u16();
        config.language = cr.packed_chars();
        config.country = cr.packed_chars();
        config.orientation = cr.u8();
        config.touchscreen = cr.u8();
        config.density = cr.u16();
        config.keyboard = cr.u8();
        config.navigation = cr.u8();
        config.input_flags = cr.u8();
        cr.u8(); // inputPad0
        config.screen_width = cr.u16();
        config.screen_height = cr.u16();
        config.sdk_version = cr.u16();
        config.minor_version = cr.u16();
        config.screen_layout = cr.u8();
        config.ui_mode = cr.u8();
        config.smallest_screen_width_dp = cr.u16();
        config.screen_width_dp = cr.u16();
        config.screen_height_dp = cr.u16();

        r.seek(start + size)?;
        Ok(config)
    }
}

// Cursor that yields zeros past the end of a (possibly short) config body.
struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        FieldReader { data, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let value = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        value
    }

    fn u16(&mut self) -> u16 {
        u16::from(self.u8()) | (u16::from(self.u8()) << 8)
    }

    fn packed_chars(&mut self) -> String {
        let raw = [self.u8(), self.u8()];
        raw.iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect()
    }
}

#[derive(Debug)]
enum EntryValue {
    Simple(ResValue),
    Bag {
        parent: u32,
        items: Vec<(u32, ResValue)>,
    },
}

#[derive(Debug)]
struct Entry {
    flags: EntryFlags,
    key_idx: u32,
    value: EntryValue,
}

// One TABLE_TYPE chunk: the entries defined for a single configuration.
#[derive(Debug)]
struct TypeChunk {
    config: Config,
    entries: HashMap<u16, Entry>,
}

#[derive(Debug)]
struct TypeGroup {
    spec_flags: Vec<u32>,
    configs: Vec<TypeChunk>,
}

#[derive(Debug)]
struct LibraryRef {
    package_id: u32,
    package_name: String,
}

#[derive(Debug)]
struct Package {
    id: u8,
    name: String,
    type_strings: StringPool,
    key_strings: StringPool,
    types: HashMap<u8, TypeGroup>,
    libraries: Vec<LibraryRef>,
}

/// The decoded `resources.arsc` model: packages, their typed entry sets per
/// configuration, and the string pools needed to render values.
///
/// Lookups memoize their configuration choice, so a table shared between
/// threads must be serialized externally.
#[derive(Debug)]
pub struct ResourceTable {
    values: StringPool,
    packages: Vec<Package>,
    // res id -> (package index, config index) picked by the default rule.
    chosen: RefCell<HashMap<u32, (usize, usize)>>,
}

/// A resolved entry: its id, key name, and either a single value or a bag.
pub struct ResourceEntry<'a> {
    pub id: u32,
    pub flags: EntryFlags,
    pub key: String,
    entry: &'a Entry,
    table: &'a ResourceTable,
}

impl ResourceEntry<'_> {
    pub fn value(&self) -> Option<&ResValue> {
        match &self.entry.value {
            EntryValue::Simple(value) => Some(value),
            EntryValue::Bag { .. } => None,
        }
    }

    /// For bag entries, the parent reference and the (name, value) pairs.
    pub fn bag(&self) -> Option<(u32, &[(u32, ResValue)])> {
        match &self.entry.value {
            EntryValue::Simple(_) => None,
            EntryValue::Bag { parent, items } => Some((*parent, items)),
        }
    }

    /// Renders the entry value as text. Bag entries have no single value
    /// and fail.
    pub fn value_string(&self) -> ParseResult<String> {
        match self.value() {
            Some(value) => self.table.format_value(value),
            None => Err(ParseError::malformed("complex entry has no single value")),
        }
    }
}

/// Parses a `resources.arsc` stream.
///
/// Malformed tables in the wild are adversarial enough that any panic from
/// the decoding path is converted into `MalformedInput`.
pub fn parse_resource_table<R: Read>(mut reader: R) -> ParseResult<ResourceTable> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    match catch_unwind(AssertUnwindSafe(|| ResourceTable::parse(&data))) {
        Ok(result) => result,
        Err(payload) => Err(ParseError::malformed(format!(
            "panic while parsing resource table: {}",
            panic_message(&payload)
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ResourceTable {
    /// Parses a resource table from its raw bytes.
    pub fn parse(data: &[u8]) -> ParseResult<ResourceTable> {
        let mut r = BinaryReader::new(data);
        let header = r.read_chunk_header()?;
        if header.id != CHUNK_TABLE {
            return Err(ParseError::UnexpectedChunk(header.id));
        }
        let package_count = r.read_u32()?;

        let mut table = ResourceTable {
            values: StringPool::empty(),
            packages: Vec::with_capacity(package_count as usize),
            chosen: RefCell::new(HashMap::new()),
        };

        // Trailing padding after the last chunk is tolerated.
        while r.position() + CHUNK_HEADER_SIZE <= header.end() {
            if is_padding(&data[r.position()..r.position() + CHUNK_HEADER_SIZE]) {
                break;
            }
            let chunk = r.read_chunk_header()?;
            match chunk.id {
                CHUNK_STRING_POOL => {
                    let payload = &data[chunk.start + CHUNK_HEADER_SIZE..chunk.end()];
                    table.values = StringPool::parse(payload)?;
                }
                CHUNK_TABLE_PACKAGE => {
                    let package = parse_package(&data[chunk.start..chunk.end()], &chunk)
                        .map_err(|err| err.in_chunk(chunk.id))?;
                    table.packages.push(package);
                }
                other => {
                    warn!("skipping unknown resource table chunk 0x{other:04x}");
                }
            }
            r.seek(chunk.end())?;
        }

        Ok(table)
    }

    /// Returns the best entry for `res_id` across all configurations that
    /// define it: a configuration whose SDK requirement fits the default
    /// (255) beats one that asks for more, otherwise the first one found
    /// wins. The choice is memoized per id.
    pub fn get_resource_entry(&self, res_id: u32) -> ParseResult<ResourceEntry<'_>> {
        if let Some(&(pkg_idx, cfg_idx)) = self.chosen.borrow().get(&res_id) {
            return self.entry_at(res_id, pkg_idx, cfg_idx);
        }

        let (pkg_idx, group) = self.type_group(res_id)?;
        let entry_id = (res_id & 0xFFFF) as u16;

        let mut best: Option<usize> = None;
        for (idx, chunk) in group.configs.iter().enumerate() {
            if !chunk.entries.contains_key(&entry_id) {
                continue;
            }
            match best {
                None => best = Some(idx),
                Some(current) => {
                    let have = &group.configs[current].config;
                    if have.sdk_version > DEFAULT_SDK
                        && chunk.config.sdk_version <= DEFAULT_SDK
                    {
                        best = Some(idx);
                    }
                }
            }
        }

        let cfg_idx = best.ok_or_else(|| {
            ParseError::malformed(format!("resource 0x{res_id:08x} has no entry"))
        })?;
        self.chosen.borrow_mut().insert(res_id, (pkg_idx, cfg_idx));
        self.entry_at(res_id, pkg_idx, cfg_idx)
    }

    /// Returns the entry for `res_id` preferring configurations whose value
    /// is a `.png` path, picking the highest density among them. References
    /// are chased with the same preference at each hop.
    pub fn get_icon_png(&self, res_id: u32) -> ParseResult<ResourceEntry<'_>> {
        let mut id = res_id;
        for _ in 0..MAX_REFERENCE_HOPS {
            let entry = self.icon_entry(id)?;
            match entry.value() {
                Some(value) if value.data_type == AttrType::Reference => {
                    id = value.data;
                }
                _ => return self.icon_entry(id),
            }
        }
        Err(ParseError::malformed(format!(
            "icon reference chain for 0x{res_id:08x} is too deep"
        )))
    }

    /// Resolves a reference value to its terminal text, following at most
    /// five indirections. Used by the XML decoder; failures there fall back
    /// to the `@<hex>` placeholder.
    pub fn resolve_reference(&self, data: u32, want_icon: bool) -> ParseResult<String> {
        if want_icon {
            return self.get_icon_png(data)?.value_string();
        }

        let mut id = data;
        for _ in 0..MAX_REFERENCE_HOPS {
            let entry = self.get_resource_entry(id)?;
            match entry.value() {
                Some(value) if value.data_type == AttrType::Reference => {
                    id = value.data;
                }
                _ => return entry.value_string(),
            }
        }
        Err(ParseError::malformed(format!(
            "reference chain for 0x{data:08x} is too deep"
        )))
    }

    fn format_value(&self, value: &ResValue) -> ParseResult<String> {
        value.format(&self.values)
    }

    fn icon_entry(&self, res_id: u32) -> ParseResult<ResourceEntry<'_>> {
        let (pkg_idx, group) = self.type_group(res_id)?;
        let entry_id = (res_id & 0xFFFF) as u16;

        let mut best: Option<(u16, usize)> = None;
        for (idx, chunk) in group.configs.iter().enumerate() {
            let Some(entry) = chunk.entries.get(&entry_id) else {
                continue;
            };
            let EntryValue::Simple(value) = &entry.value else {
                continue;
            };
            let Ok(text) = self.format_value(value) else {
                continue;
            };
            if !text.to_ascii_lowercase().ends_with(".png") {
                continue;
            }
            if best.map_or(true, |(density, _)| chunk.config.density > density) {
                best = Some((chunk.config.density, idx));
            }
        }

        match best {
            Some((_, cfg_idx)) => self.entry_at(res_id, pkg_idx, cfg_idx),
            None => self.get_resource_entry(res_id),
        }
    }

    // Locates the (package, type group) a resource id addresses, applying
    // the library remap for package id 0.
    fn type_group(&self, res_id: u32) -> ParseResult<(usize, &TypeGroup)> {
        let mut package_id = (res_id >> 24) as u8;
        if package_id == 0 {
            package_id = self.remap_zero_package()?;
        }
        let type_id = ((res_id >> 16) & 0xFF) as u8;

        let pkg_idx = self
            .packages
            .iter()
            .position(|pkg| pkg.id == package_id)
            .ok_or_else(|| {
                ParseError::malformed(format!("package 0x{package_id:02x} not in table"))
            })?;
        let group = self.packages[pkg_idx].types.get(&type_id).ok_or_else(|| {
            ParseError::malformed(format!(
                "type 0x{type_id:02x} not in package 0x{package_id:02x}"
            ))
        })?;
        Ok((pkg_idx, group))
    }

    // Shared-library references are compiled with package id 0; the library
    // chunk names the package they belong to.
    fn remap_zero_package(&self) -> ParseResult<u8> {
        for package in &self.packages {
            for library in &package.libraries {
                if library.package_id != 0 {
                    continue;
                }
                if let Some(target) = self
                    .packages
                    .iter()
                    .find(|pkg| pkg.name == library.package_name)
                {
                    return Ok(target.id);
                }
            }
        }
        Err(ParseError::malformed(
            "reference to package 0 with no library remap",
        ))
    }

    fn entry_at(
        &self,
        res_id: u32,
        pkg_idx: usize,
        cfg_idx: usize,
    ) -> ParseResult<ResourceEntry<'_>> {
        let package = &self.packages[pkg_idx];
        let type_id = ((res_id >> 16) & 0xFF) as u8;
        let entry_id = (res_id & 0xFFFF) as u16;
        let entry = package
            .types
            .get(&type_id)
            .and_then(|group| group.configs.get(cfg_idx))
            .and_then(|chunk| chunk.entries.get(&entry_id))
            .ok_or_else(|| {
                ParseError::malformed(format!("resource 0x{res_id:08x} has no entry"))
            })?;

        Ok(ResourceEntry {
            id: res_id,
            flags: entry.flags,
            key: package.key_strings.get(entry.key_idx)?,
            entry,
            table: self,
        })
    }

    /// The type name of a resource id (e.g. `drawable`), taken from its
    /// package's type-name pool.
    pub fn type_name(&self, res_id: u32) -> ParseResult<String> {
        let (pkg_idx, _) = self.type_group(res_id)?;
        let type_id = ((res_id >> 16) & 0xFF) as u8;
        if type_id == 0 {
            return Err(ParseError::malformed("resource id has type 0"));
        }
        self.packages[pkg_idx]
            .type_strings
            .get(u32::from(type_id) - 1)
    }
}

// `chunk_data` spans the whole package chunk including its header.
fn parse_package(chunk_data: &[u8], header: &ChunkHeader) -> ParseResult<Package> {
    let mut r = BinaryReader::new(chunk_data);
    r.skip(CHUNK_HEADER_SIZE)?;

    let id = r.read_u32()?;
    let name = read_utf16_name(r.read_bytes(256)?);
    let _type_strings_offset = r.read_u32()?;
    let _last_public_type = r.read_u32()?;
    let _key_strings_offset = r.read_u32()?;
    let _last_public_key = r.read_u32()?;

    let mut package = Package {
        id: id as u8,
        name,
        type_strings: StringPool::empty(),
        key_strings: StringPool::empty(),
        types: HashMap::new(),
        libraries: Vec::new(),
    };

    // Sub-chunks follow the declared package header; the two string pools
    // come first (type names, then key names) in every table aapt emits.
    r.seek(header.header_size as usize)?;
    let mut pools_seen = 0;
    while r.position() + CHUNK_HEADER_SIZE <= chunk_data.len() {
        if is_padding(&chunk_data[r.position()..r.position() + CHUNK_HEADER_SIZE]) {
            break;
        }
        let chunk = r.read_chunk_header()?;
        let payload = &chunk_data[chunk.start + CHUNK_HEADER_SIZE..chunk.end()];
        match chunk.id {
            CHUNK_STRING_POOL => {
                let pool = StringPool::parse(payload)?;
                if pools_seen == 0 {
                    package.type_strings = pool;
                } else {
                    package.key_strings = pool;
                }
                pools_seen += 1;
            }
            CHUNK_TABLE_TYPE_SPEC => {
                let (type_id, spec_flags) = parse_type_spec(payload)?;
                package
                    .types
                    .entry(type_id)
                    .or_insert_with(|| TypeGroup {
                        spec_flags: Vec::new(),
                        configs: Vec::new(),
                    })
                    .spec_flags = spec_flags;
            }
            CHUNK_TABLE_TYPE => {
                if let Some((type_id, type_chunk)) =
                    parse_type(&chunk_data[chunk.start..chunk.end()], &chunk)?
                {
                    package
                        .types
                        .entry(type_id)
                        .or_insert_with(|| TypeGroup {
                            spec_flags: Vec::new(),
                            configs: Vec::new(),
                        })
                        .configs
                        .push(type_chunk);
                }
            }
            CHUNK_TABLE_LIBRARY => {
                parse_library(payload, &mut package.libraries)?;
            }
            other => {
                warn!("skipping unknown package sub-chunk 0x{other:04x}");
            }
        }
        r.seek(chunk.end())?;
    }

    Ok(package)
}

fn parse_type_spec(payload: &[u8]) -> ParseResult<(u8, Vec<u32>)> {
    let mut r = BinaryReader::new(payload);
    let type_id = r.read_u8()?;
    r.skip(3)?; // res0, res1
    let entry_count = r.read_u32()?;
    if entry_count as usize > payload.len() / 4 {
        return Err(ParseError::malformed("type spec entry count too large"));
    }
    let mut flags = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        flags.push(r.read_u32()?);
    }
    Ok((type_id, flags))
}

// `chunk_data` spans the whole type chunk including its header. Returns
// None for layouts the resolver does not use (sparse / 16-bit offsets).
fn parse_type(
    chunk_data: &[u8],
    header: &ChunkHeader,
) -> ParseResult<Option<(u8, TypeChunk)>> {
    let mut r = BinaryReader::new(chunk_data);
    r.skip(CHUNK_HEADER_SIZE)?;

    let type_id = r.read_u8()?;
    let flags = r.read_u8()?;
    r.skip(2)?; // reserved
    let entry_count = r.read_u32()?;
    let entries_start = r.read_u32()? as usize;
    let config = Config::parse(&mut r)?;

    if flags & (TYPE_FLAG_SPARSE | TYPE_FLAG_OFFSET16) != 0 {
        warn!("skipping type 0x{type_id:02x} chunk with unsupported layout flags 0x{flags:02x}");
        return Ok(None);
    }

    if entry_count as usize > chunk_data.len() / 4 {
        return Err(ParseError::malformed("type entry count too large"));
    }

    r.seek(header.header_size as usize)?;
    let mut offsets = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        offsets.push(r.read_u32()?);
    }

    let mut entries = HashMap::new();
    for (index, offset) in offsets.into_iter().enumerate() {
        if offset == NO_ENTRY {
            continue;
        }
        let at = entries_start
            .checked_add(offset as usize)
            .ok_or_else(|| ParseError::malformed("entry offset overflow"))?;
        r.seek(at)?;
        let entry = parse_entry(&mut r)?;
        entries.insert(index as u16, entry);
    }

    Ok(Some((type_id, TypeChunk { config, entries })))
}

fn parse_entry(r: &mut BinaryReader<'_>) -> ParseResult<Entry> {
    let _size = r.read_u16()?;
    let flags = EntryFlags::from_bits_retain(r.read_u16()?);
    let key_idx = r.read_u32()?;

    let value = if flags.contains(EntryFlags::COMPLEX) {
        let parent = r.read_u32()?;
        let count = r.read_u32()?;
        if count as usize > r.remaining() / (4 + ResValue::DISK_SIZE) {
            return Err(ParseError::malformed("bag item count too large"));
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = r.read_u32()?;
            let value = ResValue::read(r)?;
            items.push((name, value));
        }
        EntryValue::Bag { parent, items }
    } else {
        EntryValue::Simple(ResValue::read(r)?)
    };

    Ok(Entry {
        flags,
        key_idx,
        value,
    })
}

fn parse_library(payload: &[u8], libraries: &mut Vec<LibraryRef>) -> ParseResult<()> {
    let mut r = BinaryReader::new(payload);
    let count = r.read_u32()?;
    if count as usize > payload.len() / 260 {
        return Err(ParseError::malformed("library entry count too large"));
    }
    for _ in 0..count {
        let package_id = r.read_u32()?;
        let package_name = read_utf16_name(r.read_bytes(256)?);
        libraries.push(LibraryRef {
            package_id,
            package_name,
        });
    }
    Ok(())
}

// Zeroed tail bytes where a chunk header would start.
fn is_padding(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

// 128 UTF-16 code units, NUL terminated.
fn read_utf16_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
