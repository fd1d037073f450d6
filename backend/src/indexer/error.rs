//! Error types for the indexer.
//!
//! Only [`IndexerError::Authentication`], [`IndexerError::Unreachable`] and
//! [`IndexerError::InvalidQuery`] ever reach the caller of a search. The other
//! variants are raised per thread and logged by the orchestrator.

use thiserror::Error;

/// Classification of transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The call exceeded the configured per-request timeout.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// Anything else reported by the HTTP client.
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Other => write!(f, "other"),
        }
    }
}

/// A failed HTTP exchange, before any status code was received.
#[derive(Debug, Clone, Error)]
#[error("{kind} error requesting {url}: {message}")]
pub struct TransportError {
    pub url: String,
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(
        url: impl Into<String>,
        kind: TransportErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Errors raised while establishing or refreshing the forum session.
#[derive(Debug, Clone, Error)]
pub enum AuthenticationError {
    /// Username or password was not supplied.
    #[error("forum credentials are missing")]
    MissingCredentials,

    /// The login page never yielded a CSRF form token.
    #[error("could not obtain a CSRF token from the login page")]
    CsrfUnavailable,

    /// The forum answered the login form with an explicit error.
    #[error("forum rejected the login: {reason}")]
    Rejected { reason: String },

    /// Every attempt produced an ambiguous response.
    #[error("login outcome could not be confirmed after {attempts} attempts")]
    Inconclusive { attempts: u32 },

    /// The forum could not be reached while logging in.
    #[error("forum unreachable during login: {reason}")]
    Unreachable { reason: String },
}

/// Errors raised while fetching a forum page.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    /// The forum served its login form instead of the requested page.
    #[error("session expired while fetching {url}")]
    SessionExpired { url: String },
}

impl FetchError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::EmptyBody { .. } => true,
            FetchError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            FetchError::SessionExpired { .. } => false,
        }
    }

    /// Whether the failure means the session is no longer authorised.
    pub fn is_authorization(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 401 || *status == 403,
            FetchError::SessionExpired { .. } => true,
            _ => false,
        }
    }

    /// Whether the failure happened below HTTP (no response at all).
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }
}

/// Errors raised by the thanks-unlock protocol.
#[derive(Debug, Clone, Error)]
pub enum UnlockError {
    #[error("post {post_id} has locked content but no thanks control")]
    NoThanksControl { post_id: u64 },

    #[error("thanks action for post {post_id} returned HTTP {status}")]
    ThanksRejected { post_id: u64, status: u16 },

    #[error("post {post_id} still hides its magnets after thanking")]
    NotRevealed { post_id: u64 },

    #[error("session lost while unlocking post {post_id}")]
    Session { post_id: u64 },

    #[error("invalid unlock transition from {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },
}

/// Errors raised when a page does not have the expected structure.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("thread page has no first post")]
    MissingFirstPost,

    #[error("invalid thread id: {0}")]
    InvalidThreadId(String),

    #[error("unexpected markup: {0}")]
    Markup(String),
}

/// Umbrella error for a search request.
#[derive(Debug, Clone, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Unlock(#[from] UnlockError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("forum unreachable: {0}")]
    Unreachable(String),
}

impl IndexerError {
    /// Whether this error must abort the whole search.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexerError::Authentication(_)
                | IndexerError::Unreachable(_)
                | IndexerError::InvalidQuery(_)
        )
    }
}

pub type IndexerResult<T> = std::result::Result<T, IndexerError>;
