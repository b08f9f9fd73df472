//! Identity-preserving reconciliation of instance lists
//!
//! Decides, per live sub-object (series, axis, module), whether to reuse,
//! patch, add, remove or rebuild it. Pure functions; no shared state.

#![warn(unreachable_pub)]

mod matcher;
mod modules;
mod status;

pub use matcher::{
    match_instances, GroupingPredicate, MatchOutcome, MatchRecord, MatchStatus, MatchStrategy,
    MatchSubject, MatcherConfig, SERIES_IDENTITY_KEYS,
};
pub use modules::{is_enabled, plan_modules, ModuleKind, ModulePlan, UnknownModule};
pub use status::UpdateStatus;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
