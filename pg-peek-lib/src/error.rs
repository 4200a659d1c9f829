use thiserror::Error;

/// Every leaf decoder in this crate returns one of these instead of a bare
/// `io::Error` so that the page and item interpreters can decide whether to
/// keep walking the block or bail out of the current item.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("short buffer: needed {needed} bytes, had {available}")]
    ShortBuffer { needed: usize, available: usize },

    #[error("alignment prefix of {align} bytes exceeds the {available} bytes available")]
    BadAlignment { align: usize, available: usize },

    #[error("no varlena header bit pattern matched byte 0x{0:02x}")]
    BadVarlenaHeader(u8),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("checksum mismatch: computed 0x{computed:04x}, stored 0x{stored:04x}")]
    ChecksumMismatch { computed: u16, stored: u16 },

    #[error("page header invalid: {0}")]
    BadHeader(String),

    #[error("item too small: needed at least {needed} bytes, got {got}")]
    ItemTooSmall { needed: usize, got: usize },

    #[error("item at offset {offset} length {length} extends beyond the page ({page_size} bytes)")]
    ItemExtendsBeyondPage {
        offset: usize,
        length: usize,
        page_size: usize,
    },

    #[error("truncated: {remaining} bytes left in tuple with attributes still to decode")]
    Truncated { remaining: usize },

    #[error("failed to open TOAST relation file for toastrelid {toastrelid}: {reason}")]
    ToastOpenFailed { toastrelid: u32, reason: String },

    #[error("TOAST reassembly incomplete for value {value_id}: got {got} of {expected} bytes")]
    ToastIncomplete {
        value_id: u32,
        got: usize,
        expected: usize,
    },

    #[error("encountered an in-page EOF while parsing the header at field {field}")]
    EofInHeader { field: &'static str },

    #[error("unrecognized attribute type name: {0}")]
    UnknownTypeName(String),

    #[error("raw size {requested} exceeds the configured decompression cap of {cap} bytes")]
    RawSizeTooLarge { requested: usize, cap: usize },

    #[error("refusing to recurse into TOAST past depth {max_depth}")]
    ToastRecursionTooDeep { max_depth: u32 },

    #[error(transparent)]
    Io(#[from] IoErrorWrapper),
}

/// `std::io::Error` doesn't implement `Clone`/`PartialEq`, which the rest of
/// this crate's error type wants for test assertions, so it's wrapped behind
/// its rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoErrorWrapper(pub String);

impl std::fmt::Display for IoErrorWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoErrorWrapper {}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError::Io(IoErrorWrapper(e.to_string()))
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;
