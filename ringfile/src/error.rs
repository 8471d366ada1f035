use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Category of an engine failure.
///
/// The set mirrors the granularity callers need to branch on: parse
/// errors on the schema surface, validation errors on otherwise
/// well-formed input, I/O and on-disk format errors, and semantic
/// errors raised while operating on a healthy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    // schema / argument parsing
    #[error("invalid data source name")]
    InvalidDsName,
    #[error("invalid data source type")]
    InvalidDsType,
    #[error("invalid DS spec")]
    InvalidDsSpec,
    #[error("duplicate data source name")]
    DuplicateDsName,
    #[error("failed to parse consolidation function name")]
    InvalidCfName,
    #[error("invalid RRA spec")]
    InvalidRraSpec,
    #[error("invalid update argument")]
    InvalidUpdateArg,
    #[error("invalid template")]
    InvalidTemplate,
    #[error("invalid integer literal")]
    InvalidInteger,
    #[error("invalid number")]
    InvalidNumber,
    #[error("invalid time specification")]
    InvalidTime,
    #[error("invalid RPN expression")]
    RpnParse,

    // validation
    #[error("min must be less than max")]
    MinMaxOrder,
    #[error("invalid xff: must be between 0 and 1")]
    InvalidXff,
    #[error("invalid step: must be >= 1")]
    InvalidStep,
    #[error("invalid row count")]
    InvalidRowCount,
    #[error("invalid alpha: must be between 0 and 1")]
    InvalidAlpha,
    #[error("invalid beta: must be between 0 and 1")]
    InvalidBeta,
    #[error("invalid gamma: must be between 0 and 1")]
    InvalidGamma,
    #[error("invalid smoothing-window: must be between 0 and 1")]
    InvalidSmoothingWindow,
    #[error("failure threshold out of range")]
    FailureThresholdOutOfRange,
    #[error("window length out of range")]
    WindowLenOutOfRange,
    #[error("window length shorter than failure threshold")]
    WindowShorterThanThreshold,
    #[error("length of seasonal cycle exceeds length of HW prediction array")]
    SeasonalCycleTooLong,
    #[error("database timespan would overflow a 32 bit time value")]
    SpanTooLarge,
    #[error("not enough arguments")]
    MissingArguments,
    #[error("unexpected trailing argument")]
    TrailingArgument,
    #[error("unrecognized argument")]
    UnrecognizedArgument,
    #[error("RPN program does not fit the compact slots")]
    RpnTooLong,
    #[error("RPN constant out of range for compact storage")]
    RpnNumberRange,

    // file I/O
    #[error("opening the file failed")]
    OpenFile,
    #[error("stat of the file failed")]
    StatFile,
    #[error("allocating the file failed")]
    Allocate,
    #[error("mmap of the file failed")]
    Mmap,
    #[error("seek beyond the end of the file")]
    Seek,
    #[error("short read")]
    ShortRead,
    #[error("attempt to write beyond the end of the file")]
    WriteBeyondEof,
    #[error("write failed")]
    Write,
    #[error("could not lock the file")]
    Lock,
    #[error("flushing the file failed")]
    Sync,

    // on-disk format
    #[error("not an RRD file")]
    BadMagic,
    #[error("float cookie mismatch: file was created on another architecture")]
    WrongArchitecture,
    #[error("unsupported file version")]
    UnsupportedVersion,
    #[error("file is shorter than the header describes")]
    FileTooShort,

    // semantics
    #[error("unknown data source name")]
    UnknownDsName,
    #[error("no RRA with a matching consolidation function")]
    NoMatchingRra,
    #[error("unrecognized consolidation function")]
    UnknownConsolidation,
    #[error("unrecognized data source type")]
    UnknownDsType,
    #[error("RPN stack underflow")]
    RpnStackUnderflow,
    #[error("RPN expression left extra values on the stack")]
    RpnUnbalanced,
    #[error("operator not permitted in a COMPUTE data source")]
    RpnForbiddenOp,
    #[error("operator is only available while graphing")]
    RpnGraphOnlyOp,
    #[error("broken dependent-RRA chain")]
    BrokenHwDependency,
}

/// Engine error: a kind plus an optional owned detail string.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, detail: None }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Error {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_and_without_detail() {
        let plain = Error::new(ErrorKind::BadMagic);
        assert_eq!(plain.to_string(), "not an RRD file");

        let detailed = Error::with_detail(ErrorKind::UnknownDsName, "cpu0");
        assert_eq!(detailed.to_string(), "unknown data source name: cpu0");
        assert_eq!(detailed.kind(), ErrorKind::UnknownDsName);
    }
}
