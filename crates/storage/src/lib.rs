pub mod error;
pub mod feed;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StoreError;
pub use feed::{ChangeFeed, FeedError, FeedPublisher};
pub use sqlite::{IngestionAudit, SqliteStore};
pub use traits::{RemoteStore, Snapshot};
