//! Append-only file
//!
//! Every change is appended, as the command that made it, to an in-memory
//! buffer inside the exclusive section. [`AofFlusher`] moves the buffer to
//! disk in the background and [`replay_file`] rebuilds a store from it on
//! startup.

mod buffer;
pub mod codec;
mod file;
mod flusher;
mod replay;

pub use buffer::{AofBuffer, FlushHint, LogAppend};
pub use codec::{decode_entries, encode_command, DecodeOutcome};
pub use file::AofFile;
pub use flusher::{AofFlusher, FlushMetrics, FlushStats};
pub use replay::{replay_bytes, replay_file, ReplayReport};
