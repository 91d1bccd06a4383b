//! CSV session segments and their consolidation.

mod format;
mod merge;
mod session;

pub use format::*;
pub use merge::*;
pub use session::*;
