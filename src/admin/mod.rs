//! Administrative command line.

pub mod cli;

pub use cli::run;
