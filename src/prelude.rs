//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use treemirror::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{MirrorError, Result};

// Index
pub use crate::index::root::{Located, Lookup, Root};
pub use crate::index::verify::TreeStats;

// Scanner
pub use crate::scanner::ignore::{IgnoreList, IgnorePredicate, NoIgnore};
pub use crate::scanner::refresh::{Refresh, RefreshOptions, Stage, Step};

// Apply
pub use crate::apply::{Action, ActionKind};

// Remote
pub use crate::remote::{LocalDirRemote, MemoryRemote, Remote, RemoteType, Status};

// Agent
pub use crate::agent::{BackupAgent, PassReport, RootOutcome, RootReport};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
