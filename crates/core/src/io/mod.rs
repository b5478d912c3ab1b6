//! Station console channels. The terminal itself is driven by the binary.

pub mod input;
pub mod output;
