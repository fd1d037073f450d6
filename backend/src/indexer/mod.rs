//! MirCrew forum indexer
//!
//! Logs into the forum, searches it (or looks up a `thread::<id>` directly),
//! presses "thanks" on the first post of every thread to reveal its hidden
//! magnets and serves the results as a Torznab feed.

pub mod categories;
pub mod client;
pub mod error;
pub mod magnet;
pub mod mircrew;
pub mod parser;
pub mod retry;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod torznab;
pub mod translate;
pub mod transport;
pub mod types;
pub mod unlock;

pub use categories::{ContentKind, TorznabCategory};
pub use client::{ForumClient, ForumQuery, ThreadReference};
pub use error::{AuthenticationError, FetchError, IndexerError, IndexerResult, UnlockError};
pub use mircrew::{IndexerSettings, MirCrewIndexer};
pub use session::{Credentials, LoginState, SessionManager};
pub use transport::{ForumTransport, ReqwestTransport, TransportConfig};
pub use types::{QueryType, SearchRequest, SearchResultItem, TorznabCapabilities};
pub use unlock::{MagnetUnlocker, UnlockedThread};
