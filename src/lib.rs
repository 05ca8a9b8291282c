//! # apkdec
//!
//! A library for decoding the two binary assets at the heart of an Android
//! package: the compiled XML used by `AndroidManifest.xml` and the compiled
//! resource table `resources.arsc`.
//!
//! The decoder drives an injected [`XmlSink`] with start/end/text tokens and
//! resolves integer resource references against the parsed resource table,
//! so obfuscated and adversarially malformed packages still produce a
//! readable manifest.
//!
//! # Examples
//!
//! ```no_run
//! use apkdec::{parse_apk, XmlEncoder};
//!
//! let mut encoder = XmlEncoder::new(Vec::new());
//! let errors = parse_apk("app.apk", &mut encoder);
//! if let Some(err) = errors.manifest {
//!     eprintln!("failed to parse AndroidManifest.xml: {err}");
//! }
//! println!("{}", String::from_utf8(encoder.into_inner()).unwrap());
//! ```

use std::io::Read;
use std::path::Path;

mod attributes;
mod binary_xml;
pub mod chunk;
mod encoder;
mod error;
mod resource_table;
mod string_pool;
#[cfg(test)]
pub(crate) mod test_support;
mod value;
mod zip;

pub use crate::binary_xml::parse_xml;
pub use crate::encoder::{
    TokenCollector, XmlAttr, XmlEncoder, XmlName, XmlSink, XmlToken, ANDROID_NAMESPACE_URI,
};
pub use crate::error::{ParseError, ParseResult};
pub use crate::resource_table::{
    parse_resource_table, Config, EntryFlags, ResourceEntry, ResourceTable,
};
pub use crate::string_pool::StringPool;
pub use crate::value::{AttrType, ResAttr, ResValue};
pub use crate::zip::{Zip, ZipEntry, ZipEntryFile};

// Decompressed entries are capped; nothing Android loads comes close.
const MAX_ENTRY_SIZE: u64 = 1 << 28;

/// Decodes XML documents from an opened APK, resolving resource references
/// against its `resources.arsc` when that could be parsed.
pub struct ApkParser<S: XmlSink> {
    zip: Zip,
    sink: S,
    resources: Option<ResourceTable>,
}

impl<S: XmlSink> ApkParser<S> {
    /// Loads `resources.arsc` from the archive and prepares the parser.
    ///
    /// The error slot reports why resources are unavailable; the parser is
    /// usable either way, references just stay unresolved.
    pub fn new(zip: Zip, sink: S) -> (ApkParser<S>, Option<ParseError>) {
        let (resources, resources_err) = match load_resources(&zip) {
            Ok(table) => (Some(table), None),
            Err(err) => (None, Some(err)),
        };
        (
            ApkParser {
                zip,
                sink,
                resources,
            },
            resources_err,
        )
    }

    /// Decodes the named in-package XML document, trying every record the
    /// archive stores under that name until one parses.
    pub fn parse_xml(&mut self, name: &str) -> ParseResult<()> {
        parse_xml_in_zip(&self.zip, name, &mut self.sink, self.resources.as_ref())
    }

    /// Parses a standalone `resources.arsc` stream.
    pub fn parse_resource_table<R: Read>(reader: R) -> ParseResult<ResourceTable> {
        resource_table::parse_resource_table(reader)
    }

    pub fn resources(&self) -> Option<&ResourceTable> {
        self.resources.as_ref()
    }

    pub fn zip(&self) -> &Zip {
        &self.zip
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// The three independent outcomes of [`parse_apk`]: a caller can succeed on
/// the manifest even when resources fail.
#[derive(Debug, Default)]
pub struct ApkParseErrors {
    pub zip: Option<ParseError>,
    pub resources: Option<ParseError>,
    pub manifest: Option<ParseError>,
}

impl ApkParseErrors {
    pub fn ok(&self) -> bool {
        self.zip.is_none() && self.resources.is_none() && self.manifest.is_none()
    }
}

/// Opens an APK and decodes its `AndroidManifest.xml` into `sink`,
/// resolving references through `resources.arsc` when possible.
pub fn parse_apk(path: impl AsRef<Path>, sink: &mut dyn XmlSink) -> ApkParseErrors {
    let zip = match Zip::open(path) {
        Ok(zip) => zip,
        Err(err) => {
            return ApkParseErrors {
                zip: Some(err),
                ..ApkParseErrors::default()
            }
        }
    };

    let (resources, resources_err) = match load_resources(&zip) {
        Ok(table) => (Some(table), None),
        Err(err) => (None, Some(err)),
    };
    let manifest_err =
        parse_xml_in_zip(&zip, "AndroidManifest.xml", sink, resources.as_ref()).err();

    ApkParseErrors {
        zip: None,
        resources: resources_err,
        manifest: manifest_err,
    }
}

fn load_resources(zip: &Zip) -> ParseResult<ResourceTable> {
    let mut file = zip
        .by_name("resources.arsc")
        .ok_or_else(|| ParseError::NotFoundInZip("resources.arsc".to_string()))?;
    let data = file.read_all(MAX_ENTRY_SIZE)?;
    resource_table::parse_resource_table(&data[..])
}

// Every record stored under the name is tried in order; the last error
// survives only if all of them fail, except the plain-text sentinel which
// is reported verbatim.
fn parse_xml_in_zip(
    zip: &Zip,
    name: &str,
    sink: &mut dyn XmlSink,
    resources: Option<&ResourceTable>,
) -> ParseResult<()> {
    let mut file = zip
        .by_name(name)
        .ok_or_else(|| ParseError::NotFoundInZip(name.to_string()))?;
    file.open()?;

    let mut last_err: Option<ParseError> = None;
    while file.next() {
        let mut data = Vec::new();
        if let Err(err) = Read::take(&mut file, MAX_ENTRY_SIZE).read_to_end(&mut data) {
            last_err = Some(err.into());
            continue;
        }
        match binary_xml::parse_xml(&data, sink, resources) {
            Ok(()) => {
                file.close();
                return Ok(());
            }
            Err(err) => last_err = Some(err),
        }
    }
    file.close();

    match last_err {
        Some(err) if err.is_plain_text_manifest() => Err(ParseError::PlainTextManifest),
        Some(err) => Err(err),
        None => Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
    }
}
