//! mvault-transfer: range negotiation and bounded window copies
//!
//! # Overview
//! - `range`: parse `Range: bytes=<start>-[<end>]` against a known length
//! - `copy`: skip-then-copy through a fixed buffer, flushing on every exit

pub mod copy;
pub mod range;

pub use copy::{stream_reader, StreamCopier, DEFAULT_BUFFER_SIZE};
pub use range::{
    negotiate, unsatisfied_content_range, window, ByteRange, RangeError, RangeOutcome,
    ACCEPT_RANGES,
};
