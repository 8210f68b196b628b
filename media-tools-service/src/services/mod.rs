pub mod metrics;
pub mod resolver;
pub mod usage;

pub use resolver::{HttpPageFetcher, PageFetcher, ResolveError, UrlResolver};
pub use usage::{
    InMemoryUsageStore, MongoUsageStore, RedisUsageStore, UsageError, UsageLimiter, UsageStore,
};
