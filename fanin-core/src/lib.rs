//! FANIN Core - Request-Scoped Lookup Coalescing
//!
//! Collects point lookups issued concurrently within one request, merges
//! them into a single bulk backend call per parameter, and fans the results
//! back out to every caller. Results are cached per (identifier, parameter)
//! for the life of the request, so each pair is fetched at most once.
//!
//! - [`Fetcher`]: the batching loader
//! - [`ParamRegistry`]: one fetcher per parameter value
//! - [`AggregateFetcher`]: one-to-many lookups grouped by identifier

pub mod aggregate;
pub mod batch;
pub mod cell;
pub mod config;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod identity;
pub mod registry;
pub mod stats;

pub use aggregate::{group_by, AggregateFetcher, Group};
pub use batch::Batch;
pub use cell::{Outcome, ResultCell};
pub use config::{LoaderConfig, DEFAULT_DELAY, DEFAULT_MAX_BATCH};
pub use context::RequestContext;
pub use error::{ConfigError, ContextError, LoadError, LoadResult};
pub use fetcher::{BatchFetch, Fetcher, FetcherBuilder};
pub use identity::{IdExtractor, Identify, DEFAULT_ID_FIELD};
pub use registry::ParamRegistry;
pub use stats::FetcherStats;
