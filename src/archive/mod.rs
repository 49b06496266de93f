//! Archive access.
//!
//! Every supported format (ZIP, RAR, 7z) is read through the 7-Zip binary:
//! `sevenzip` drives the executable, `reader` adds password handling,
//! batched reads and streaming copies on top, `dump` writes diagnostics
//! when a stream ends early.

pub mod dump;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod reader;
pub mod sevenzip;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryTool;
pub use reader::{ArchiveReader, CopyProgress, CopyProgressFn, CopyReport, PendingReadSet};
pub use sevenzip::{
    check_errors, locate_executable, parse_listing, ArchiveEntry, ArchiveTool, ExtractStream, Listing,
    SevenZipTool, ToolOutput, ToolStatus,
};
