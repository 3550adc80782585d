pub mod args;
pub mod error;
pub mod io;
pub mod stats;
pub mod structs;
pub mod utils;

#[cfg(feature = "clap")]
pub mod clap;
