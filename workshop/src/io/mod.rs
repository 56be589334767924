//! I/O helpers: configuration, child processes, and the commission archive.

pub mod archive;
pub mod config;
pub mod process;
