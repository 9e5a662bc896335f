//! Domain models for the live-stream pipeline

pub mod engagement;
pub mod notification;
pub mod snapshot;
pub mod stream;
pub mod viewer;

pub use engagement::{Comment, Gift, ReactionKind};
pub use notification::{Notification, NOTIFY_STREAM_STARTING};
pub use snapshot::Snapshot;
pub use stream::{NewStream, Stream, StreamStatus};
pub use viewer::ViewerRecord;
