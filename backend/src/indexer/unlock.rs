//! Thanks-to-unlock protocol
//!
//! Only the first post of a thread is considered. Magnets already visible are
//! taken as they are. Hidden-content placeholders are unlocked in two phases:
//! send the thanks action once, then re-fetch the thread and accept at most
//! one newly revealed magnet per placeholder.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::client::{ForumClient, ThreadPage, ThreadReference};
use super::error::{IndexerError, UnlockError};
use super::magnet::MagnetUri;
use super::parser::{self, ThreadDocument};

/// The thanks action of a post. Not `Clone`: it is consumed by exactly one
/// unlock attempt.
#[derive(Debug)]
pub struct UnlockAction {
    pub post_id: u64,
    /// Absolute thanks endpoint URL
    pub thanks_url: String,
    /// The control already offers to remove thanks
    pub already_thanked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateState {
    Unlocked { uri: String },
    Locked,
}

/// A magnet slot found in the first post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMagnetCandidate {
    pub post_id: u64,
    /// Position within the post
    pub position: usize,
    pub state: CandidateState,
}

/// First post classification: its candidates and the thanks action they share.
#[derive(Debug)]
pub struct FirstPostScan {
    pub post_id: u64,
    pub candidates: Vec<RawMagnetCandidate>,
    pub action: Option<UnlockAction>,
}

impl FirstPostScan {
    pub fn from_document(document: &ThreadDocument, base_url: &str) -> Self {
        let post = &document.first_post;

        let unlocked = post.magnets.iter().map(|uri| CandidateState::Unlocked { uri: uri.clone() });
        let locked = std::iter::repeat_n(CandidateState::Locked, post.locked_placeholders);
        let candidates = unlocked
            .chain(locked)
            .enumerate()
            .map(|(position, state)| RawMagnetCandidate {
                post_id: post.post_id,
                position,
                state,
            })
            .collect();

        let action = post.thanks.as_ref().map(|thanks| UnlockAction {
            post_id: post.post_id,
            thanks_url: parser::absolute_url(base_url, &thanks.href),
            already_thanked: thanks.already_thanked,
        });

        Self {
            post_id: post.post_id,
            candidates,
            action,
        }
    }

    pub fn locked_count(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.state == CandidateState::Locked)
            .count()
    }
}

/// Lifecycle of the locked candidates of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    Locked,
    Unlocking,
    Unlocked,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockEvent {
    /// The thanks action was accepted
    ThanksSent,
    /// The post was thanked before; nothing was sent
    AlreadyThanked,
    /// The thanks action could not be sent or was refused
    ThanksFailed,
    /// The re-fetched post shows new magnets
    Revealed,
    /// The re-fetched post still hides its magnets
    NotRevealed,
}

impl UnlockState {
    fn name(&self) -> &'static str {
        match self {
            UnlockState::Locked => "locked",
            UnlockState::Unlocking => "unlocking",
            UnlockState::Unlocked => "unlocked",
            UnlockState::Failed => "failed",
        }
    }

    /// Pure transition function.
    pub fn advance(self, event: UnlockEvent) -> Result<Self, UnlockError> {
        use UnlockEvent::*;
        use UnlockState::*;

        match (self, event) {
            (Locked, ThanksSent | AlreadyThanked) => Ok(Unlocking),
            (Locked, ThanksFailed) => Ok(Failed),
            (Unlocking, Revealed) => Ok(Unlocked),
            (Unlocking, NotRevealed) => Ok(Failed),
            (from, event) => Err(UnlockError::InvalidTransition {
                from: from.name(),
                event: match event {
                    ThanksSent => "thanks_sent",
                    AlreadyThanked => "already_thanked",
                    ThanksFailed => "thanks_failed",
                    Revealed => "revealed",
                    NotRevealed => "not_revealed",
                },
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnlockState::Unlocked | UnlockState::Failed)
    }
}

/// A magnet confirmed visible in the first post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockedMagnet {
    pub uri: String,
    pub info_hash: String,
    pub display_name: Option<String>,
    pub exact_length: Option<u64>,
    pub thread_id: u64,
    pub post_id: u64,
    pub position: usize,
}

impl UnlockedMagnet {
    fn from_uri(uri: &str, thread_id: u64, post_id: u64, position: usize) -> Option<Self> {
        let magnet = MagnetUri::parse(uri)?;
        Some(Self {
            uri: magnet.uri,
            info_hash: magnet.info_hash,
            display_name: magnet.display_name,
            exact_length: magnet.exact_length,
            thread_id,
            post_id,
            position,
        })
    }
}

/// The outcome of unlocking one thread.
#[derive(Debug, Clone)]
pub struct UnlockedThread {
    pub reference: ThreadReference,
    pub title: Option<String>,
    pub forum_id: Option<u32>,
    pub posted_at: Option<DateTime<Utc>>,
    pub magnets: Vec<UnlockedMagnet>,
    /// Locked candidates that could not be unlocked
    pub failed: usize,
}

pub struct MagnetUnlocker {
    client: Arc<ForumClient>,
}

impl MagnetUnlocker {
    pub fn new(client: Arc<ForumClient>) -> Self {
        Self { client }
    }

    /// Collect every magnet of the thread's first post, unlocking hidden ones.
    pub async fn unlock(&self, page: ThreadPage) -> Result<UnlockedThread, IndexerError> {
        let reference = page.reference;
        let document = parser::parse_thread(&page.body)?;
        let mut scan = FirstPostScan::from_document(&document, self.client.session().base_url());

        let mut magnets: Vec<UnlockedMagnet> = scan
            .candidates
            .iter()
            .filter_map(|c| match &c.state {
                CandidateState::Unlocked { uri } => {
                    UnlockedMagnet::from_uri(uri, reference.id, c.post_id, c.position)
                }
                CandidateState::Locked => None,
            })
            .collect();

        let locked = scan.locked_count();
        let mut thread = UnlockedThread {
            title: document.title.clone(),
            forum_id: document.forum_id,
            posted_at: document.first_post.posted_at,
            reference,
            magnets: Vec::new(),
            failed: 0,
        };
        if locked == 0 {
            thread.magnets = magnets;
            return Ok(thread);
        }

        debug!(
            thread_id = %thread.reference.id,
            post_id = %scan.post_id,
            locked = locked,
            "First post has locked content"
        );

        let mut state = UnlockState::Locked;
        let event = match scan.action.take() {
            None => {
                warn!(
                    thread_id = %thread.reference.id,
                    error = %UnlockError::NoThanksControl { post_id: scan.post_id },
                    "Cannot unlock post"
                );
                UnlockEvent::ThanksFailed
            }
            Some(action) if action.already_thanked => {
                debug!(post_id = %action.post_id, "Post already thanked, re-verifying only");
                UnlockEvent::AlreadyThanked
            }
            Some(action) => match self.send_thanks(action, &thread.reference).await {
                Ok(()) => UnlockEvent::ThanksSent,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(thread_id = %thread.reference.id, error = %e, "Thanks action failed");
                    UnlockEvent::ThanksFailed
                }
            },
        };
        state = state.advance(event)?;

        let mut revealed = Vec::new();
        if state == UnlockState::Unlocking {
            revealed = self.reveal(&thread.reference, &magnets, locked).await?;
            let event = if revealed.is_empty() {
                UnlockEvent::NotRevealed
            } else {
                UnlockEvent::Revealed
            };
            state = state.advance(event)?;
        }

        thread.failed = locked - revealed.len();
        if state == UnlockState::Failed || thread.failed > 0 {
            warn!(
                thread_id = %thread.reference.id,
                error = %UnlockError::NotRevealed { post_id: scan.post_id },
                failed = thread.failed,
                "Locked magnets were not revealed"
            );
        } else {
            info!(
                thread_id = %thread.reference.id,
                revealed = revealed.len(),
                "Unlocked magnets"
            );
        }

        magnets.extend(revealed);
        thread.magnets = magnets;
        Ok(thread)
    }

    /// Re-fetch the thread and pick up to `limit` magnets not seen before.
    async fn reveal(
        &self,
        reference: &ThreadReference,
        known: &[UnlockedMagnet],
        limit: usize,
    ) -> Result<Vec<UnlockedMagnet>, IndexerError> {
        let page = match self.client.fetch_thread(reference).await {
            Ok(page) => page,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(thread_id = %reference.id, error = %e, "Re-fetch after thanks failed");
                return Ok(Vec::new());
            }
        };
        let document = parser::parse_thread(&page.body)?;
        let post = &document.first_post;

        let mut revealed: Vec<UnlockedMagnet> = Vec::new();
        for (position, uri) in post.magnets.iter().enumerate() {
            if revealed.len() >= limit {
                break;
            }
            let Some(magnet) = UnlockedMagnet::from_uri(uri, reference.id, post.post_id, position)
            else {
                continue;
            };
            let seen = known
                .iter()
                .chain(revealed.iter())
                .any(|m| m.info_hash == magnet.info_hash);
            if !seen {
                revealed.push(magnet);
            }
        }

        Ok(revealed)
    }

    /// Send the thanks action, re-authenticating once if the session was lost.
    async fn send_thanks(
        &self,
        action: UnlockAction,
        reference: &ThreadReference,
    ) -> Result<(), IndexerError> {
        let session = self.client.session();
        let headers = [
            ("X-Requested-With", "XMLHttpRequest".to_string()),
            ("Referer", reference.url.clone()),
        ];

        for attempt in 1..=2 {
            debug!(post_id = %action.post_id, attempt = attempt, "Sending thanks");
            let generation = session.generation().await;
            let page = session
                .post_form(&action.thanks_url, &[], &headers)
                .await
                .map_err(|e| IndexerError::Fetch(e.into()))?;

            let session_lost = page.status == 401
                || page.status == 403
                || parser::shows_login_form(&page.body);
            if session_lost {
                if attempt == 1 {
                    session.invalidate_generation(generation).await;
                    session.ensure_valid().await?;
                    continue;
                }
                return Err(UnlockError::Session {
                    post_id: action.post_id,
                }
                .into());
            }

            if !page.is_success() {
                return Err(UnlockError::ThanksRejected {
                    post_id: action.post_id,
                    status: page.status,
                }
                .into());
            }
            return Ok(());
        }

        Err(UnlockError::Session {
            post_id: action.post_id,
        }
        .into())
    }
}
