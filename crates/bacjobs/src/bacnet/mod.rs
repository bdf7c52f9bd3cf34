//! BACnet integration
//!
//! Protocol types, the client contract the jobs are written against, and a
//! simulated network implementing it.

mod client;
pub mod sim;
mod types;

pub use client::*;
pub use types::*;
