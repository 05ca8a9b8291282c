use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors surfaced by the APK decoders.
#[derive(Debug)]
pub enum ParseError {
    /// Underlying I/O failure while reading the archive or an entry.
    Io(io::Error),
    /// The input violates the binary format (bad size, bad flag, truncated
    /// data, invalid string encoding).
    MalformedInput(String),
    /// A chunk id that is not valid at the current position.
    UnexpectedChunk(u16),
    /// A string-pool index outside the pool.
    StringIndexOutOfRange(u32),
    /// The manifest is plain-text XML, not the compiled binary form.
    PlainTextManifest,
    /// The named entry does not exist in the archive.
    NotFoundInZip(String),
    /// `open` was called on an already-open zip entry.
    AlreadyOpen,
    /// The XML token sink failed.
    Xml(String),
    /// A sub-parser failed inside the chunk with this id.
    Chunk(u16, Box<ParseError>),
}

impl ParseError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ParseError::MalformedInput(msg.into())
    }

    pub(crate) fn in_chunk(self, id: u16) -> Self {
        ParseError::Chunk(id, Box::new(self))
    }

    /// True for the plain-text manifest sentinel, looking through chunk
    /// wrappers.
    pub fn is_plain_text_manifest(&self) -> bool {
        match self {
            ParseError::PlainTextManifest => true,
            ParseError::Chunk(_, inner) => inner.is_plain_text_manifest(),
            _ => false,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Io(err) => write!(f, "I/O error: {err}"),
            ParseError::MalformedInput(msg) => write!(f, "malformed input: {msg}"),
            ParseError::UnexpectedChunk(id) => write!(f, "unexpected chunk id 0x{id:x}"),
            ParseError::StringIndexOutOfRange(idx) => {
                write!(f, "string with idx {idx} not found")
            }
            ParseError::PlainTextManifest => {
                write!(f, "xml is in plaintext, binary form expected")
            }
            ParseError::NotFoundInZip(name) => write!(f, "failed to find {name} in APK"),
            ParseError::AlreadyOpen => write!(f, "file is already opened"),
            ParseError::Xml(msg) => write!(f, "XML error: {msg}"),
            ParseError::Chunk(id, cause) => write!(f, "Chunk 0x{id:08x}: {cause}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Io(err) => Some(err),
            ParseError::Chunk(_, cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(value: io::Error) -> Self {
        ParseError::Io(value)
    }
}

impl From<quick_xml::Error> for ParseError {
    fn from(value: quick_xml::Error) -> Self {
        ParseError::Xml(value.to_string())
    }
}
