//! wb-tail: live tail of a growing text file.
//!
//! A [`TailSession`] replays the last lines of a file once, then follows it
//! with a byte cursor that survives growth, truncation and rotation. The
//! session itself is synchronous; the runtime drives it on a timer.

pub mod cursor;
pub mod replay;
pub mod session;

pub use cursor::{TailCursor, TailError, TailRead};
pub use session::{DEFAULT_REPLAY_LINES, TailMessage, TailSession, TailState};
