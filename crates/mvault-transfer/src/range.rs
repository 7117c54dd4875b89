//! `Range` header negotiation against a blob of known length
//!
//! Only the single-range form `bytes=<start>-[<end>]` is accepted. A missing
//! header means full content; anything present but unusable (bad syntax,
//! multiple ranges, suffix ranges, out-of-bounds windows) is not satisfiable.

use mvault_core::VaultError;
use thiserror::Error;

/// Unit advertised in `Accept-Ranges`
pub const ACCEPT_RANGES: &str = "bytes";

const UNIT_PREFIX: &str = "bytes=";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("requested range not satisfiable for length {total}")]
    NotSatisfiable { total: u64 },
}

impl RangeError {
    pub fn total(&self) -> u64 {
        match self {
            RangeError::NotSatisfiable { total } => *total,
        }
    }

    /// `Content-Range` value for a 416 response
    pub fn content_range(&self) -> String {
        unsatisfied_content_range(self.total())
    }
}

impl From<RangeError> for VaultError {
    fn from(err: RangeError) -> Self {
        VaultError::RangeNotSatisfiable { total: err.total() }
    }
}

/// An inclusive window `[start, end]` inside a blob of `total` bytes.
/// Always satisfies `start <= end < total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64, total: u64) -> Result<Self, RangeError> {
        if start > end || end >= total {
            return Err(RangeError::NotSatisfiable { total });
        }
        Ok(Self { start, end, total })
    }

    /// Number of bytes served: `end - start + 1`
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a 206 response
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// What to serve for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No `Range` header: serve `[0, total)` with status 200
    Full { total: u64 },
    /// Serve the window with status 206
    Partial(ByteRange),
}

impl RangeOutcome {
    pub fn is_partial(&self) -> bool {
        matches!(self, RangeOutcome::Partial(_))
    }

    /// First byte served
    pub fn start(&self) -> u64 {
        match self {
            RangeOutcome::Full { .. } => 0,
            RangeOutcome::Partial(r) => r.start,
        }
    }

    pub fn content_length(&self) -> u64 {
        match self {
            RangeOutcome::Full { total } => *total,
            RangeOutcome::Partial(r) => r.content_length(),
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            RangeOutcome::Full { total } => *total,
            RangeOutcome::Partial(r) => r.total,
        }
    }
}

/// Compute the serve window for `range_header` against `total` bytes.
pub fn negotiate(range_header: Option<&str>, total: u64) -> Result<RangeOutcome, RangeError> {
    let Some(header) = range_header else {
        return Ok(RangeOutcome::Full { total });
    };
    let unsatisfiable = RangeError::NotSatisfiable { total };

    let spec = header
        .trim()
        .strip_prefix(UNIT_PREFIX)
        .ok_or_else(|| unsatisfiable.clone())?;
    let (start, end) = spec.split_once('-').ok_or_else(|| unsatisfiable.clone())?;

    let start: u64 = start.trim().parse().map_err(|_| {
        tracing::debug!(header, "unparseable range start");
        unsatisfiable.clone()
    })?;

    let end = match end.trim() {
        "" => total.checked_sub(1).ok_or_else(|| unsatisfiable.clone())?,
        e => e.parse::<u64>().map_err(|_| {
            tracing::debug!(header, "unparseable range end");
            unsatisfiable.clone()
        })?,
    };

    ByteRange::new(start, end, total).map(RangeOutcome::Partial)
}

/// Explicit window from query parameters, validated like a `Range` header.
pub fn window(start: u64, end: u64, total: u64) -> Result<ByteRange, RangeError> {
    ByteRange::new(start, end, total)
}

/// `Content-Range` value for a 416 response: `bytes */<total>`
pub fn unsatisfied_content_range(total: u64) -> String {
    format!("bytes */{total}")
}
