//! Traffic-class probe protocol
//!
//! Wire envelope, sequence numbers and the deterministic payload corpus used
//! by the per-priority echo streams.

pub mod header;
pub mod payload;
pub mod sequence;

pub use header::{decode, encode, HeaderError, MessageType, WireHeader, HEADER_SIZE, TYPE_SEQ_NUM};
pub use payload::{PayloadSource, LOREM_IPSUM};
pub use sequence::SeqNumber;
