//! Device read/write engines shared by the jobs

mod read;
mod write;

pub use read::*;
pub use write::*;
