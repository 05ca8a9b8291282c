use std::collections::HashMap;
use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{ParseError, ParseResult};

/// The Android manifest namespace. Attributes resolved by resource id live
/// here even when the document forgot to say so.
pub const ANDROID_NAMESPACE_URI: &str = "http://schemas.android.com/apk/res/android";

/// A namespaced XML name; `namespace` is the URI, empty when unqualified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlName {
    pub namespace: String,
    pub local: String,
}

impl XmlName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        XmlName {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    pub fn local(local: impl Into<String>) -> Self {
        XmlName {
            namespace: String::new(),
            local: local.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlAttr {
    pub name: XmlName,
    pub value: String,
}

/// Tokens the binary XML decoder drives its sink with, in file order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlToken {
    StartElement { name: XmlName, attrs: Vec<XmlAttr> },
    EndElement { name: XmlName },
    CharData(String),
}

/// The token consumer injected into the decoder.
pub trait XmlSink {
    fn emit(&mut self, token: XmlToken) -> ParseResult<()>;
    fn flush(&mut self) -> ParseResult<()>;
}

/// Collects tokens into a vector. Useful for tests and for callers that
/// want to inspect the document instead of serializing it.
#[derive(Default)]
pub struct TokenCollector {
    pub tokens: Vec<XmlToken>,
}

impl TokenCollector {
    pub fn new() -> Self {
        TokenCollector::default()
    }
}

impl XmlSink for TokenCollector {
    fn emit(&mut self, token: XmlToken) -> ParseResult<()> {
        self.tokens.push(token);
        Ok(())
    }

    fn flush(&mut self) -> ParseResult<()> {
        Ok(())
    }
}

/// Serializes tokens as indented XML text.
///
/// Namespace URIs are mapped to prefixes (`android`, `app` and `tools` for
/// the well-known Android URIs, `nsN` otherwise) and each prefix is declared
/// with an `xmlns` attribute on the first element that uses it. Elements
/// with no content collapse to the self-closing form.
pub struct XmlEncoder<W: Write> {
    writer: Writer<W>,
    prefixes: HashMap<String, String>,
    next_generated: usize,
    // A start tag held back until we know whether the element is empty.
    pending: Option<(String, Vec<(String, String)>)>,
}

impl<W: Write> XmlEncoder<W> {
    pub fn new(inner: W) -> Self {
        XmlEncoder {
            writer: Writer::new_with_indent(inner, b' ', 4),
            prefixes: HashMap::new(),
            next_generated: 0,
            pending: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn qualified(&self, name: &XmlName) -> String {
        if name.namespace.is_empty() {
            return name.local.clone();
        }
        match self.prefixes.get(&name.namespace) {
            Some(prefix) => format!("{}:{}", prefix, name.local),
            None => name.local.clone(),
        }
    }

    // Assigns prefixes for any URIs this element introduces and returns the
    // xmlns declarations to attach to it.
    fn declare_namespaces(&mut self, name: &XmlName, attrs: &[XmlAttr]) -> Vec<(String, String)> {
        let mut declarations = Vec::new();
        let uris = std::iter::once(&name.namespace)
            .chain(attrs.iter().map(|attr| &attr.name.namespace));
        for uri in uris {
            if uri.is_empty() || self.prefixes.contains_key(uri) {
                continue;
            }
            let prefix = match uri.as_str() {
                ANDROID_NAMESPACE_URI => "android".to_string(),
                "http://schemas.android.com/apk/res-auto" => "app".to_string(),
                "http://schemas.android.com/tools" => "tools".to_string(),
                _ => {
                    self.next_generated += 1;
                    format!("ns{}", self.next_generated - 1)
                }
            };
            declarations.push((format!("xmlns:{prefix}"), uri.clone()));
            self.prefixes.insert(uri.clone(), prefix);
        }
        declarations
    }

    fn write_pending(&mut self, self_closing: bool) -> ParseResult<()> {
        if let Some((tag, attrs)) = self.pending.take() {
            let mut start = BytesStart::new(tag.as_str());
            for (key, value) in &attrs {
                start.push_attribute((key.as_str(), value.as_str()));
            }
            if self_closing {
                self.writer.write_event(Event::Empty(start))?;
            } else {
                self.writer.write_event(Event::Start(start))?;
            }
        }
        Ok(())
    }
}

impl<W: Write> XmlSink for XmlEncoder<W> {
    fn emit(&mut self, token: XmlToken) -> ParseResult<()> {
        match token {
            XmlToken::StartElement { name, attrs } => {
                self.write_pending(false)?;
                let mut pairs = self.declare_namespaces(&name, &attrs);
                let tag = self.qualified(&name);
                pairs = pairs
                    .into_iter()
                    .chain(attrs.iter().map(|attr| {
                        (self.qualified(&attr.name), attr.value.clone())
                    }))
                    .collect();
                self.pending = Some((tag, pairs));
            }
            XmlToken::EndElement { name } => {
                let tag = self.qualified(&name);
                if self
                    .pending
                    .as_ref()
                    .is_some_and(|(pending_tag, _)| *pending_tag == tag)
                {
                    self.write_pending(true)?;
                } else {
                    self.write_pending(false)?;
                    self.writer
                        .write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
            }
            XmlToken::CharData(text) => {
                self.write_pending(false)?;
                self.writer.write_event(Event::Text(BytesText::new(&text)))?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> ParseResult<()> {
        self.write_pending(false)?;
        self.writer
            .get_mut()
            .flush()
            .map_err(|err| ParseError::Xml(err.to_string()))
    }
}
