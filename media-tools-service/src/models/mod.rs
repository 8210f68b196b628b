pub mod resolution;
pub mod usage;

pub use resolution::{BasicInfo, ResolutionMethod, ResolutionTrace, ResolvedVideo};
pub use usage::{
    ConsumeOutcome, UsagePolicy, UsageRecord, UsageStatus, DEFAULT_GENERATION_LIMIT,
    DEFAULT_USAGE_WINDOW,
};
