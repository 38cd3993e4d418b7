//! Wire protocol shared by the stowage upload server and its clients.
//!
//! Text frames carry a JSON [`Message`] envelope; chunk data travels in
//! binary frames (see [`binary`]).

pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use binary::{ChunkHeader, ParseError, encode_chunk_frame, parse_chunk_frame};
pub use constants::*;
pub use envelope::{ErrorBody, Message};
pub use messages::*;
pub use types::*;
