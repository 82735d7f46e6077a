use simdutf8::compat::{from_utf8, Utf8Error};
use snafu::{ResultExt as _, Snafu};

/// A decoding error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum DecodeError {
    /// The buffer contained a byte sequence that is not valid UTF-8.
    #[snafu(display("Malformed {} input: {}", encoding, source))]
    Malformed {
        /// Name of the encoding the buffer was decoded with.
        encoding: &'static str,

        /// Error source.
        source: Utf8Error,
    },
}

impl DecodeError {
    /// Returns the number of leading bytes that were valid before the malformed sequence.
    pub fn valid_up_to(&self) -> usize {
        match self {
            Self::Malformed { source, .. } => source.valid_up_to(),
        }
    }

    /// Returns the length of the malformed sequence, or `None` if the buffer ended in the middle of a sequence.
    pub fn error_len(&self) -> Option<usize> {
        match self {
            Self::Malformed { source, .. } => source.error_len(),
        }
    }

    /// Returns the name of the encoding the buffer was decoded with.
    pub fn encoding(&self) -> &'static str {
        match self {
            Self::Malformed { encoding, .. } => *encoding,
        }
    }
}

/// Event buffer decoder.
///
/// Converts raw event bytes into text under a single, fixed encoding: UTF-8. Malformed input is reported rather than
/// replaced, so a corrupted event is never persisted with substitution characters in it.
///
/// Decoding borrows from the input and holds no per-call state, so a single decoder is constructed per transport and
/// shared by every thread calling into the ingest path.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Decoder;

impl Utf8Decoder {
    /// Creates a new `Utf8Decoder`.
    pub const fn new() -> Self {
        Self
    }

    /// Returns the name of the encoding this decoder accepts.
    pub const fn encoding(&self) -> &'static str {
        "UTF-8"
    }

    /// Decodes `buffer` as text.
    ///
    /// # Errors
    ///
    /// If `buffer` is not valid UTF-8, an error is returned describing where the malformed sequence starts.
    pub fn decode<'a>(&self, buffer: &'a [u8]) -> Result<&'a str, DecodeError> {
        from_utf8(buffer).context(Malformed {
            encoding: self.encoding(),
        })
    }
}
