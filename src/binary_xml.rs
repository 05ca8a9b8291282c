use crate::attributes::attribute_name;
use crate::chunk::{
    BinaryReader, CHUNK_HEADER_SIZE, CHUNK_RESOURCE_IDS, CHUNK_STRING_POOL, CHUNK_XML_MASK,
    CHUNK_XML_NS_END, CHUNK_XML_NS_START, CHUNK_XML_TAG_END, CHUNK_XML_TAG_START, CHUNK_XML_TEXT,
};
use crate::encoder::{XmlAttr, XmlName, XmlSink, XmlToken, ANDROID_NAMESPACE_URI};
use crate::error::{ParseError, ParseResult};
use crate::resource_table::ResourceTable;
use crate::string_pool::StringPool;
use crate::value::{AttrType, ResAttr};

/// Decodes a compiled binary XML document, driving `sink` with the token
/// stream. `resources` is optional; without it, reference values render as
/// `@<hex>` placeholders.
///
/// A plain-text document (one that starts with `<?xml ` or `<manif`) fails
/// with [`ParseError::PlainTextManifest`] so callers can tell already
/// decoded inputs apart from corrupt ones.
pub fn parse_xml(
    data: &[u8],
    sink: &mut dyn XmlSink,
    resources: Option<&ResourceTable>,
) -> ParseResult<()> {
    let result = parse_document(data, sink, resources);
    let flushed = sink.flush();
    result.and(flushed)
}

struct XmlDecoder<'a> {
    strings: StringPool,
    resource_ids: Vec<u32>,
    resources: Option<&'a ResourceTable>,
}

fn parse_document(
    data: &[u8],
    sink: &mut dyn XmlSink,
    resources: Option<&ResourceTable>,
) -> ParseResult<()> {
    let mut r = BinaryReader::new(data);

    // The top header is read without bounds validation: plain-text inputs
    // produce garbage lengths here, and Android itself never checks the id.
    let id = r.read_u16()?;
    let _header_size = r.read_u16()?;
    let total_len = r.read_u32()?;

    if id & 0xFF == u16::from(b'<')
        && (data.starts_with(b"<?xml ") || data.starts_with(b"<manif"))
    {
        return Err(ParseError::PlainTextManifest);
    }

    let mut decoder = XmlDecoder {
        strings: StringPool::empty(),
        resource_ids: Vec::new(),
        resources,
    };

    let body_len = (total_len as usize).saturating_sub(CHUNK_HEADER_SIZE);
    let mut consumed = 0usize;
    while consumed < body_len {
        let header = r.read_chunk_header()?;
        let payload = &data[header.start + CHUNK_HEADER_SIZE..header.end()];
        let mut pr = BinaryReader::new(payload);

        decoder
            .parse_chunk(header.id, &mut pr, sink)
            .map_err(|err| err.in_chunk(header.id))?;

        if pr.remaining() != 0 {
            return Err(
                ParseError::malformed("chunk was not fully read").in_chunk(header.id)
            );
        }

        r.seek(header.end())?;
        consumed += header.size as usize;
    }

    Ok(())
}

impl XmlDecoder<'_> {
    fn parse_chunk(
        &mut self,
        id: u16,
        pr: &mut BinaryReader<'_>,
        sink: &mut dyn XmlSink,
    ) -> ParseResult<()> {
        match id {
            CHUNK_STRING_POOL => {
                self.strings = StringPool::parse(pr.data)?;
                pr.seek(pr.data.len())?;
                Ok(())
            }
            CHUNK_RESOURCE_IDS => self.parse_resource_ids(pr),
            _ => {
                if id & CHUNK_XML_MASK == 0 {
                    return Err(ParseError::UnexpectedChunk(id));
                }
                // Line number and a reserved 0xFFFFFFFF precede every XML
                // event chunk.
                pr.skip(8)?;
                match id {
                    CHUNK_XML_NS_START => self.parse_ns_start(pr),
                    CHUNK_XML_NS_END => pr.skip(8),
                    CHUNK_XML_TAG_START => self.parse_tag_start(pr, sink),
                    CHUNK_XML_TAG_END => self.parse_tag_end(pr, sink),
                    CHUNK_XML_TEXT => self.parse_text(pr, sink),
                    _ => Err(ParseError::UnexpectedChunk(id)),
                }
            }
        }
    }

    fn parse_resource_ids(&mut self, pr: &mut BinaryReader<'_>) -> ParseResult<()> {
        if pr.remaining() % 4 != 0 {
            return Err(ParseError::malformed("invalid resource-id chunk size"));
        }
        let count = pr.remaining() / 4;
        self.resource_ids.reserve(count);
        for _ in 0..count {
            let id = pr.read_u32()?;
            self.resource_ids.push(id);
        }
        Ok(())
    }

    // Namespace scoping is not tracked; prefixes are reconstructed from the
    // URIs carried on every tag. The chunk is still fully decoded so that
    // malformed string indices fail here, like any other chunk.
    fn parse_ns_start(&mut self, pr: &mut BinaryReader<'_>) -> ParseResult<()> {
        let prefix_idx = pr.read_u32()?;
        let uri_idx = pr.read_u32()?;
        self.strings.get(prefix_idx)?;
        self.strings.get(uri_idx)?;
        Ok(())
    }

    fn parse_tag_start(
        &mut self,
        pr: &mut BinaryReader<'_>,
        sink: &mut dyn XmlSink,
    ) -> ParseResult<()> {
        let namespace_idx = pr.read_u32()?;
        let name_idx = pr.read_u32()?;
        let _attr_start = pr.read_u16()?;
        let attr_size = pr.read_u16()? as usize;
        let attr_count = pr.read_u16()?;
        pr.skip(6)?; // idIndex, classIndex, styleIndex

        let namespace = self.strings.get(namespace_idx)?;
        let name = self.strings.get(name_idx)?;

        let mut attrs = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            let attr = ResAttr::read(pr)?;
            if attr_size > ResAttr::DISK_SIZE {
                pr.skip(attr_size - ResAttr::DISK_SIZE)?;
            }
            attrs.push(self.decode_attribute(&name, attr)?);
        }

        sink.emit(XmlToken::StartElement {
            name: XmlName::new(namespace, name),
            attrs,
        })
    }

    fn parse_tag_end(
        &mut self,
        pr: &mut BinaryReader<'_>,
        sink: &mut dyn XmlSink,
    ) -> ParseResult<()> {
        let namespace_idx = pr.read_u32()?;
        let name_idx = pr.read_u32()?;
        let namespace = self.strings.get(namespace_idx)?;
        let name = self.strings.get(name_idx)?;
        sink.emit(XmlToken::EndElement {
            name: XmlName::new(namespace, name),
        })
    }

    fn parse_text(
        &mut self,
        pr: &mut BinaryReader<'_>,
        sink: &mut dyn XmlSink,
    ) -> ParseResult<()> {
        let idx = pr.read_u32()?;
        let text = self.strings.get(idx)?;
        pr.skip(8)?;
        sink.emit(XmlToken::CharData(text))
    }

    // Android resolves attribute names by resource id (the side table maps
    // string-pool indices to framework ids); the pool usually carries the
    // same names, but obfuscators strip them. The `package` attribute of
    // the root manifest tag and the `platformBuildVersion*` meta attributes
    // MUST come from the pool even when a resource id name exists.
    fn decode_attribute(&self, tag_name: &str, attr: ResAttr) -> ParseResult<XmlAttr> {
        let mut attr_name = String::new();
        if let Some(&res_id) = self.resource_ids.get(attr.name_idx as usize) {
            if let Some(known) = attribute_name(res_id) {
                attr_name = known.to_string();
            }
        }

        let mut name_from_strings = String::new();
        if attr_name.is_empty() || tag_name == "manifest" {
            match self.strings.get(attr.name_idx) {
                Ok(pooled) => {
                    name_from_strings = pooled;
                    if !attr_name.is_empty()
                        && name_from_strings != "package"
                        && !name_from_strings.starts_with("platformBuildVersion")
                    {
                        name_from_strings.clear();
                    }
                }
                Err(err) => {
                    if attr_name.is_empty() {
                        return Err(err);
                    }
                }
            }
        }

        let mut attr_namespace = self.strings.get(attr.namespace_idx)?;
        if !name_from_strings.is_empty() {
            attr_name = name_from_strings;
        } else if attr_namespace.is_empty() {
            attr_namespace = ANDROID_NAMESPACE_URI.to_string();
        }

        let value = self.format_attribute_value(&attr, &attr_name)?;
        Ok(XmlAttr {
            name: XmlName::new(attr_namespace, attr_name),
            value,
        })
    }

    fn format_attribute_value(&self, attr: &ResAttr, attr_name: &str) -> ParseResult<String> {
        Ok(match attr.value.data_type {
            AttrType::String => self.strings.get(attr.raw_value_idx)?,
            AttrType::IntBool => {
                if attr.value.data != 0 {
                    "true".to_string()
                } else {
                    "false".to_string()
                }
            }
            AttrType::IntHex => format!("0x{:x}", attr.value.data),
            AttrType::Float => f32::from_bits(attr.value.data).to_string(),
            AttrType::Reference => {
                let resolved = self.resources.and_then(|res| {
                    let want_icon = attr_name == "icon" || attr_name == "roundIcon";
                    res.resolve_reference(attr.value.data, want_icon)
                        .ok()
                        .filter(|text| !text.is_empty())
                });
                match resolved {
                    Some(text) => text,
                    None => format!("@{:x}", attr.value.data),
                }
            }
            _ => (attr.value.data as i32).to_string(),
        })
    }
}
