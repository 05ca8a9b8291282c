use crate::chunk::BinaryReader;
use crate::error::ParseResult;
use crate::string_pool::StringPool;

/// Typed-value tags shared by XML attributes and resource-table entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrType {
    Null,
    Reference,
    Attribute,
    String,
    Float,
    IntDec,
    IntHex,
    IntBool,
    IntColorArgb8,
    IntColorRgb8,
    IntColorArgb4,
    IntColorRgb4,
    Unknown(u8),
}

impl AttrType {
    pub fn from_raw(raw: u8) -> AttrType {
        match raw {
            0x00 => AttrType::Null,
            0x01 => AttrType::Reference,
            0x02 => AttrType::Attribute,
            0x03 => AttrType::String,
            0x04 => AttrType::Float,
            0x10 => AttrType::IntDec,
            0x11 => AttrType::IntHex,
            0x12 => AttrType::IntBool,
            0x1c => AttrType::IntColorArgb8,
            0x1d => AttrType::IntColorRgb8,
            0x1e => AttrType::IntColorArgb4,
            0x1f => AttrType::IntColorRgb4,
            other => AttrType::Unknown(other),
        }
    }
}

/// The packed value record: a type tag and a 32-bit data word whose meaning
/// depends on the tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResValue {
    pub size: u16,
    pub res0: u8,
    pub data_type: AttrType,
    pub data: u32,
}

impl ResValue {
    /// On-disk size of the record.
    pub const DISK_SIZE: usize = 8;

    pub fn read(r: &mut BinaryReader<'_>) -> ParseResult<ResValue> {
        let size = r.read_u16()?;
        let res0 = r.read_u8()?;
        let data_type = AttrType::from_raw(r.read_u8()?);
        let data = r.read_u32()?;
        Ok(ResValue {
            size,
            res0,
            data_type,
            data,
        })
    }

    /// Renders the value as attribute text. `String` data indexes into
    /// `strings`; references and attributes render as hex placeholders (the
    /// resource table resolves references before calling this when it can).
    pub fn format(&self, strings: &StringPool) -> ParseResult<String> {
        Ok(match self.data_type {
            AttrType::Null => String::new(),
            AttrType::Reference => format!("@{:x}", self.data),
            AttrType::Attribute => format!("?{:x}", self.data),
            AttrType::String => strings.get(self.data)?,
            AttrType::Float => f32::from_bits(self.data).to_string(),
            AttrType::IntHex => format!("0x{:x}", self.data),
            AttrType::IntBool => {
                if self.data != 0 {
                    "true".to_string()
                } else {
                    "false".to_string()
                }
            }
            AttrType::IntColorArgb8 => format!("#{:08x}", self.data),
            AttrType::IntColorRgb8 => format!("#{:06x}", self.data & 0x00FF_FFFF),
            AttrType::IntColorArgb4 => format!("#{:04x}", self.data & 0xFFFF),
            AttrType::IntColorRgb4 => format!("#{:03x}", self.data & 0x0FFF),
            AttrType::IntDec | AttrType::Unknown(_) => (self.data as i32).to_string(),
        })
    }
}

/// One XML attribute record as stored on disk: namespace, name and raw
/// string indices plus the typed value.
#[derive(Clone, Copy, Debug)]
pub struct ResAttr {
    pub namespace_idx: u32,
    pub name_idx: u32,
    pub raw_value_idx: u32,
    pub value: ResValue,
}

impl ResAttr {
    /// On-disk size of the record; tag-start chunks may declare a larger
    /// per-attribute stride, the excess is skipped.
    pub const DISK_SIZE: usize = 20;

    pub fn read(r: &mut BinaryReader<'_>) -> ParseResult<ResAttr> {
        let namespace_idx = r.read_u32()?;
        let name_idx = r.read_u32()?;
        let raw_value_idx = r.read_u32()?;
        let value = ResValue::read(r)?;
        Ok(ResAttr {
            namespace_idx,
            name_idx,
            raw_value_idx,
            value,
        })
    }
}
