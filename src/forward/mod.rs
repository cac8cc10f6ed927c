//! Group-to-destination forwarding pipeline.

pub mod dedup;
pub mod dispatch;
pub mod filter;
pub mod format;
pub mod matcher;
pub mod router;
pub mod stats;

pub use dedup::DedupCache;
pub use dispatch::Dispatcher;
pub use router::Router;
pub use stats::ForwardStats;
