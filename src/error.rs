use std::fmt;

use thiserror::Error;

/// Where a failure happened.
///
/// The numeric codes are part of the stable interface and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Index file handling
    Index = 1,
    /// Building an index
    Indexing = 2,
    /// Video post-processing
    Postprocessing = 3,
    /// Pixel format conversion and scaling
    Scaling = 4,
    /// Audio or video decoding
    Decoding = 5,
    /// Seeking
    Seeking = 6,
    /// Container parsing
    Parser = 7,
    /// Track handling
    Track = 8,
    /// Reading or writing a serialized index
    Serialization = 9,
    /// Operation aborted by the caller
    Cancelled = 10,
    /// Audio resampling
    Resampling = 11,
}

/// What caused a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSubkind {
    Unknown = 20,
    /// Format or operation not supported by this build
    Unsupported = 21,
    FileRead = 22,
    FileWrite = 23,
    NoFile = 24,
    /// Wrong index version
    Version = 25,
    AllocationFailed = 26,
    InvalidArgument = 27,
    /// Decoder error
    Codec = 28,
    /// Requested mode or operation is unavailable
    NotAvailable = 29,
    /// The index does not belong to the file
    FileMismatch = 30,
    /// Caller misuse or caller-requested abort
    User = 31,
}

impl ErrorKind {
    /// Stable numeric code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl ErrorSubkind {
    /// Stable numeric code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Index => "index",
            ErrorKind::Indexing => "indexing",
            ErrorKind::Postprocessing => "postprocessing",
            ErrorKind::Scaling => "scaling",
            ErrorKind::Decoding => "decoding",
            ErrorKind::Seeking => "seeking",
            ErrorKind::Parser => "parser",
            ErrorKind::Track => "track",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Resampling => "resampling",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ErrorSubkind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSubkind::Unknown => "unknown",
            ErrorSubkind::Unsupported => "unsupported",
            ErrorSubkind::FileRead => "file read",
            ErrorSubkind::FileWrite => "file write",
            ErrorSubkind::NoFile => "no such file",
            ErrorSubkind::Version => "version mismatch",
            ErrorSubkind::AllocationFailed => "allocation failed",
            ErrorSubkind::InvalidArgument => "invalid argument",
            ErrorSubkind::Codec => "codec",
            ErrorSubkind::NotAvailable => "not available",
            ErrorSubkind::FileMismatch => "file mismatch",
            ErrorSubkind::User => "user",
        };
        f.write_str(name)
    }
}

/// Main error type for the engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error ({subkind}): {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub subkind: ErrorSubkind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, subkind: ErrorSubkind, message: impl Into<String>) -> Self {
        Self {
            kind,
            subkind,
            message: message.into(),
        }
    }

    /// True when both dimensions match.
    pub fn is(&self, kind: ErrorKind, subkind: ErrorSubkind) -> bool {
        self.kind == kind && self.subkind == subkind
    }

    /// Map an I/O error that happened while opening `what`.
    pub(crate) fn open_failed(kind: ErrorKind, what: &str, err: &std::io::Error) -> Self {
        let subkind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorSubkind::NoFile,
            _ => ErrorSubkind::FileRead,
        };
        Self::new(kind, subkind, format!("Can't open '{}': {}", what, err))
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(
            ErrorKind::Cancelled,
            ErrorSubkind::User,
            "Cancelled by user",
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Default message capacity of an [`ErrorInfo`], in bytes.
pub const DEFAULT_ERROR_CAPACITY: usize = 1024;

/// Bounded error report for hosts that surface errors as plain fields.
///
/// Filled on failure, left untouched on success. Messages longer than the
/// capacity are truncated on a character boundary.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    kind: Option<ErrorKind>,
    subkind: Option<ErrorSubkind>,
    message: String,
    capacity: usize,
}

impl ErrorInfo {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            kind: None,
            subkind: None,
            message: String::new(),
            capacity,
        }
    }

    /// Record `err`, replacing whatever was stored before.
    pub fn record(&mut self, err: &Error) {
        self.kind = Some(err.kind);
        self.subkind = Some(err.subkind);
        self.message.clear();
        let mut end = err.message.len().min(self.capacity);
        while !err.message.is_char_boundary(end) {
            end -= 1;
        }
        self.message.push_str(&err.message[..end]);
    }

    /// Unwrap `result`, recording the error when there is one.
    pub fn capture<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.record(&e);
                None
            }
        }
    }

    /// Error kind code, 0 when nothing was recorded.
    pub fn kind_code(&self) -> i32 {
        self.kind.map(ErrorKind::code).unwrap_or(0)
    }

    /// Error subkind code, 0 when nothing was recorded.
    pub fn subkind_code(&self) -> i32 {
        self.subkind.map(ErrorSubkind::code).unwrap_or(0)
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    pub fn subkind(&self) -> Option<ErrorSubkind> {
        self.subkind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_set(&self) -> bool {
        self.kind.is_some()
    }
}

impl Default for ErrorInfo {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ERROR_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorKind::Index.code(), 1);
        assert_eq!(ErrorKind::Resampling.code(), 11);
        assert_eq!(ErrorSubkind::Unknown.code(), 20);
        assert_eq!(ErrorSubkind::FileMismatch.code(), 30);
        assert_eq!(ErrorSubkind::User.code(), 31);
    }

    #[test]
    fn test_display() {
        let err = Error::new(ErrorKind::Seeking, ErrorSubkind::Codec, "bad seek");
        assert_eq!(err.to_string(), "seeking error (codec): bad seek");
    }

    #[test]
    fn test_error_info_truncates() {
        let mut info = ErrorInfo::with_capacity(5);
        info.record(&Error::new(
            ErrorKind::Index,
            ErrorSubkind::FileRead,
            "abcdefghij",
        ));
        assert_eq!(info.message(), "abcde");
        assert_eq!(info.kind(), Some(ErrorKind::Index));
        assert_eq!(info.subkind_code(), 22);
    }

    #[test]
    fn test_error_info_truncates_on_char_boundary() {
        let mut info = ErrorInfo::with_capacity(2);
        info.record(&Error::new(ErrorKind::Index, ErrorSubkind::Unknown, "é!"));
        // 'é' is two bytes; capacity 2 keeps it whole
        assert_eq!(info.message(), "é");

        let mut info = ErrorInfo::with_capacity(1);
        info.record(&Error::new(ErrorKind::Index, ErrorSubkind::Unknown, "é!"));
        assert_eq!(info.message(), "");
    }

    #[test]
    fn test_capture_leaves_info_untouched_on_success() {
        let mut info = ErrorInfo::default();
        assert_eq!(info.capture(Ok::<_, Error>(7)), Some(7));
        assert!(!info.is_set());
        assert_eq!(info.kind_code(), 0);

        let failed: Result<i32> = Err(Error::cancelled());
        assert_eq!(info.capture(failed), None);
        assert_eq!(info.kind(), Some(ErrorKind::Cancelled));
        assert_eq!(info.subkind(), Some(ErrorSubkind::User));
    }

    #[test]
    fn test_open_failed_maps_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::open_failed(ErrorKind::Parser, "x.mkv", &io);
        assert!(err.is(ErrorKind::Parser, ErrorSubkind::NoFile));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = Error::open_failed(ErrorKind::Parser, "x.mkv", &io);
        assert!(err.is(ErrorKind::Parser, ErrorSubkind::FileRead));
    }
}
