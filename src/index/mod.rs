//! Persistent tree index: fixed records, name table, free list.

pub mod names;
pub mod record;
pub mod root;
pub mod store;
pub mod verify;
