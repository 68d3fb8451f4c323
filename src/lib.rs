// src/lib.rs

//! Haul Package Manager
//!
//! Installs self-contained packages described by JSON documents in
//! prioritized buckets, and builds per-package environments from their
//! declared dependencies.
//!
//! # Architecture
//!
//! - File-first: every piece of state is a JSON document under one root
//! - Transactions: installs stage, verify and swap into place, or change nothing
//! - Buckets: ordered metadata sources synced from git or snapshot feeds
//! - Venvs: dependency closures flushed into a simulated process environment
//! - One read-only `Context` is passed to every component

pub mod archive;
pub mod bucket;
pub mod checksum;
pub mod config;
pub mod context;
pub mod download;
pub mod environment;
mod error;
pub mod install;
pub mod local;
pub mod lock;
pub mod process;
pub mod progress;
pub mod venv;
pub mod version;

pub use context::{Arch, Context, Paths};
pub use error::{Error, Result};
