//! Structured error taxonomy for the compiler, loader and matcher.
//!
//! Every fallible public entry point returns [`HighlightError`]. UTF-8
//! validation failures inside [`crate::matcher::Matcher::do_match`] are the one
//! exception: per the match-loop's iterator-style contract they are signalled
//! through a sentinel span instead of a `Result`.

use std::sync::Arc;

/// Numeric error code, mirrored 1:1 onto [`HighlightError`] variants so that
/// hosts embedding this engine through an FFI boundary can match on an
/// integer instead of a Rust enum discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidFormat = 1,
    InvalidRegex = 2,
    InvalidName = 3,
    UndefinedUse = 4,
    UseCycle = 5,
    EmptyStartCycle = 6,
    NoSyntax = 7,
    OutOfMemory = 8,
    BadArg = 9,
    Internal = 10,
}

/// Free-form source-location context attached to most error variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLocation {
    pub line_number: Option<u32>,
    pub file_name: Option<Arc<str>>,
    pub extra: Option<String>,
}

impl ErrorLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    pub fn with_file(mut self, file: impl Into<Arc<str>>) -> Self {
        self.file_name = Some(file.into());
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

/// The error taxonomy. One variant per row of the error table: schema
/// failures, regex compile failures, naming rules, the two cycle classes,
/// lookup misses, allocation failures, caller-contract violations and
/// internal invariant breaks.
#[derive(Debug, thiserror::Error)]
pub enum HighlightError {
    #[error("invalid language description format{}", fmt_loc(.0))]
    InvalidFormat(ErrorLocation),

    #[error("invalid regular expression{}", fmt_loc(.0))]
    InvalidRegex(
        ErrorLocation,
        #[source] Option<Box<dyn std::error::Error + Send + Sync>>,
    ),

    #[error("invalid extract name{}", fmt_loc(.0))]
    InvalidName(ErrorLocation),

    #[error("use of undefined name{}", fmt_loc(.0))]
    UndefinedUse(ErrorLocation),

    #[error("cycle among use-links{}", fmt_loc(.0))]
    UseCycle(ErrorLocation),

    #[error("cycle among empty-start transitions{}", fmt_loc(.0))]
    EmptyStartCycle(ErrorLocation),

    #[error("no matching syntax definition{}", fmt_loc(.0))]
    NoSyntax(ErrorLocation),

    /// Kept for wire-format parity with the numeric error table every
    /// public entry point reports through. Rust aborts the process on
    /// allocation failure rather than returning an error, so nothing in
    /// this crate ever constructs this variant today; it exists so a
    /// future fallible-allocation path has somewhere to report into.
    #[error("allocation failed{}", fmt_loc(.0))]
    OutOfMemory(ErrorLocation),

    #[error("invalid argument{}", fmt_loc(.0))]
    BadArg(ErrorLocation),

    #[error("internal invariant violated{}", fmt_loc(.0))]
    Internal(ErrorLocation),
}

fn fmt_loc(loc: &ErrorLocation) -> String {
    let mut parts = Vec::new();
    if let Some(file) = &loc.file_name {
        parts.push(format!("in {file}"));
    }
    if let Some(line) = loc.line_number {
        parts.push(format!("at line {line}"));
    }
    if let Some(extra) = &loc.extra {
        parts.push(format!("({extra})"));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(": {}", parts.join(" "))
    }
}

impl HighlightError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HighlightError::InvalidFormat(_) => ErrorCode::InvalidFormat,
            HighlightError::InvalidRegex(_, _) => ErrorCode::InvalidRegex,
            HighlightError::InvalidName(_) => ErrorCode::InvalidName,
            HighlightError::UndefinedUse(_) => ErrorCode::UndefinedUse,
            HighlightError::UseCycle(_) => ErrorCode::UseCycle,
            HighlightError::EmptyStartCycle(_) => ErrorCode::EmptyStartCycle,
            HighlightError::NoSyntax(_) => ErrorCode::NoSyntax,
            HighlightError::OutOfMemory(_) => ErrorCode::OutOfMemory,
            HighlightError::BadArg(_) => ErrorCode::BadArg,
            HighlightError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn location(&self) -> &ErrorLocation {
        match self {
            HighlightError::InvalidFormat(l)
            | HighlightError::InvalidRegex(l, _)
            | HighlightError::InvalidName(l)
            | HighlightError::UndefinedUse(l)
            | HighlightError::UseCycle(l)
            | HighlightError::EmptyStartCycle(l)
            | HighlightError::NoSyntax(l)
            | HighlightError::OutOfMemory(l)
            | HighlightError::BadArg(l)
            | HighlightError::Internal(l) => l,
        }
    }
}

pub type Result<T> = std::result::Result<T, HighlightError>;
