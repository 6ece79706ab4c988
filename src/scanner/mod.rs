//! Local tree scanning: listings, the ignore predicate and the refresh engine.

pub mod ignore;
pub mod listing;
pub mod refresh;
