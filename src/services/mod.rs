//! Business logic layer
//!
//! - stream lifecycle and engagement operations
//! - analytics snapshotting
//! - user directory lookups

pub mod analytics;
pub mod stream_service;
pub mod user_directory;

pub use analytics::AnalyticsSnapshotter;
pub use stream_service::{PresenceCounts, StreamAnalytics, StreamService};
pub use user_directory::{
    PgUserDirectory, SharedUserDirectory, StaticUserDirectory, UserDirectory,
};
