//! Activity logging: JSONL writer fed by a background thread.

pub mod activity;
pub mod jsonl;
