#![forbid(unsafe_code)]

//! treemirror: backup agent that mirrors local directory trees onto a remote
//! store.
//!
//! Each backup root keeps a compact persistent index (fixed 16-byte records
//! plus a name table). A resumable differ compares that index with the local
//! tree and yields one action at a time; the apply layer changes the remote
//! first and the index second.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use treemirror::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use treemirror::index::root::Root;
//! use treemirror::scanner::refresh::{Refresh, RefreshOptions, Step};
//! ```

pub mod prelude;

pub mod agent;
pub mod apply;
pub mod core;
pub mod index;
pub mod logger;
pub mod remote;
pub mod scanner;
