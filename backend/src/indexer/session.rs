//! Forum session management
//!
//! Owns the one authenticated browser session of the process. The login flow
//! follows phpBB: load the login page for fresh CSRF material, post the form,
//! then confirm the outcome with two independent markers (a logout control is
//! present AND the login form is gone).
//!
//! Every other component reaches the forum through [`SessionManager::get`] and
//! [`SessionManager::post_form`], so all requests share the transport's cookie
//! jar.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{AuthenticationError, TransportError};
use super::parser::{self, LoginIndicators};
use super::retry::{RetryConfig, retry_async};
use super::transport::{ForumTransport, HttpPage};

/// Forum account credentials. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Anonymous,
    Authenticated,
    Expired,
}

/// Snapshot of the session.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: LoginState,
    /// CSRF token of the most recent login page load
    pub csrf_token: Option<String>,
    pub authenticated_at: Option<Instant>,
    /// Logout link discovered after login (carries the phpBB `sid`)
    pub logout_url: Option<String>,
    /// Completed logins since startup
    pub login_count: u32,
}

impl Session {
    fn anonymous() -> Self {
        Self {
            state: LoginState::Anonymous,
            csrf_token: None,
            authenticated_at: None,
            logout_url: None,
            login_count: 0,
        }
    }

    /// Whether the session can be used without touching the network.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.state == LoginState::Authenticated
            && self
                .authenticated_at
                .is_some_and(|at| at.elapsed() < max_age)
    }
}

/// Session manager settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Forum root, e.g. `https://mircrew-releases.org`
    pub base_url: String,
    /// Login attempts and the backoff between them
    pub login_retry: RetryConfig,
    /// How long a login is reused before re-authenticating
    pub max_age: Duration,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            login_retry: RetryConfig::default(),
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Why a single login attempt did not succeed.
#[derive(Debug, Clone)]
enum AttemptFailure {
    Transport(String),
    MissingToken,
    StaleForm(String),
    Rejected(String),
    Inconclusive,
}

impl AttemptFailure {
    fn is_retryable(&self) -> bool {
        !matches!(self, AttemptFailure::Rejected(_))
    }

    fn into_error(self, attempts: u32) -> AuthenticationError {
        match self {
            AttemptFailure::Transport(reason) => AuthenticationError::Unreachable { reason },
            AttemptFailure::MissingToken => AuthenticationError::CsrfUnavailable,
            AttemptFailure::StaleForm(reason) | AttemptFailure::Rejected(reason) => {
                AuthenticationError::Rejected { reason }
            }
            AttemptFailure::Inconclusive => AuthenticationError::Inconclusive { attempts },
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Transport(reason) => write!(f, "transport failure: {}", reason),
            AttemptFailure::MissingToken => write!(f, "login page carried no form token"),
            AttemptFailure::StaleForm(msg) => write!(f, "stale form token: {}", msg),
            AttemptFailure::Rejected(msg) => write!(f, "rejected: {}", msg),
            AttemptFailure::Inconclusive => write!(f, "login outcome inconclusive"),
        }
    }
}

struct LoginSuccess {
    csrf_token: Option<String>,
    logout_href: Option<String>,
}

pub struct SessionManager {
    transport: Arc<dyn ForumTransport>,
    credentials: Credentials,
    config: SessionConfig,
    session: Mutex<Session>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn ForumTransport>,
        credentials: Credentials,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            config,
            session: Mutex::new(Session::anonymous()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Absolute URL for a forum path or page-relative href.
    pub fn url(&self, href: &str) -> String {
        parser::absolute_url(&self.config.base_url, href)
    }

    /// Current session snapshot.
    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }

    /// Log in unconditionally.
    pub async fn login(&self) -> Result<Session, AuthenticationError> {
        let mut session = self.session.lock().await;
        self.login_locked(&mut session).await?;
        Ok(session.clone())
    }

    /// Return a usable session, logging in only when the current one is
    /// missing, expired or too old.
    pub async fn ensure_valid(&self) -> Result<Session, AuthenticationError> {
        let mut session = self.session.lock().await;
        if session.is_fresh(self.config.max_age) {
            return Ok(session.clone());
        }

        if session.state == LoginState::Authenticated {
            debug!("Session older than max age, re-authenticating");
        }
        self.login_locked(&mut session).await?;
        Ok(session.clone())
    }

    /// Mark the session expired; the next `ensure_valid` logs in again.
    pub async fn invalidate(&self) {
        let mut session = self.session.lock().await;
        expire(&mut session);
    }

    /// Login generation a request runs under. Pass it back to
    /// [`SessionManager::invalidate_generation`] when that request is rejected.
    pub async fn generation(&self) -> u32 {
        self.session.lock().await.login_count
    }

    /// Expire the session only if no login completed since `generation` was
    /// read. Returns whether the session was expired.
    pub async fn invalidate_generation(&self, generation: u32) -> bool {
        let mut session = self.session.lock().await;
        if session.login_count != generation {
            debug!(
                generation = generation,
                current = session.login_count,
                "Session already renewed, keeping it"
            );
            return false;
        }
        expire(&mut session);
        true
    }

    /// Log out (best effort) and drop all cookies.
    pub async fn logout(&self) {
        let mut session = self.session.lock().await;

        if let Some(url) = session.logout_url.take() {
            if let Err(e) = self.transport.get(&url, &[]).await {
                warn!(error = %e, "Logout request failed");
            }
        }

        self.transport.reset_cookies();
        session.state = LoginState::Anonymous;
        session.csrf_token = None;
        session.authenticated_at = None;
    }

    /// GET a forum page inside the session.
    pub async fn get(
        &self,
        href: &str,
        query: &[(String, String)],
    ) -> Result<HttpPage, TransportError> {
        self.transport.get(&self.url(href), query).await
    }

    /// POST a form inside the session.
    pub async fn post_form(
        &self,
        href: &str,
        form: &[(String, String)],
        headers: &[(&'static str, String)],
    ) -> Result<HttpPage, TransportError> {
        self.transport.post_form(&self.url(href), form, headers).await
    }

    async fn login_locked(&self, session: &mut Session) -> Result<(), AuthenticationError> {
        if !self.credentials.is_complete() {
            return Err(AuthenticationError::MissingCredentials);
        }

        info!("Logging in to forum");

        let attempt = AtomicU32::new(0);
        let result = retry_async(
            || {
                let attempt = &attempt;
                async move {
                    let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
                    if n > 1 {
                        self.transport.reset_cookies();
                    }
                    self.attempt_login(n == 1).await
                }
            },
            AttemptFailure::is_retryable,
            &self.config.login_retry,
            "forum_login",
        )
        .await;

        match result {
            Ok(success) => {
                session.state = LoginState::Authenticated;
                session.csrf_token = success.csrf_token;
                session.authenticated_at = Some(Instant::now());
                session.logout_url = success.logout_href.map(|href| self.url(&href));
                session.login_count += 1;
                info!(attempts = attempt.load(Ordering::SeqCst), "Forum login succeeded");
                Ok(())
            }
            Err(failure) => {
                session.state = LoginState::Expired;
                let error = failure.into_error(attempt.load(Ordering::SeqCst));
                warn!(error = %error, "Forum login failed");
                Err(error)
            }
        }
    }

    async fn attempt_login(&self, first_attempt: bool) -> Result<LoginSuccess, AttemptFailure> {
        if first_attempt {
            if let Err(e) = self.get("index.php", &[]).await {
                debug!(error = %e, "Index page unavailable before login");
            }
        }

        let login_query = vec![
            ("mode".to_string(), "login".to_string()),
            ("redirect".to_string(), "index.php".to_string()),
        ];
        let page = self
            .get("ucp.php", &login_query)
            .await
            .map_err(|e| AttemptFailure::Transport(e.to_string()))?;
        if !page.is_success() {
            return Err(AttemptFailure::Transport(format!(
                "login page returned HTTP {}",
                page.status
            )));
        }

        let Some(form) = parser::parse_login_form(&page.body) else {
            let indicators = parser::login_indicators(&page.body);
            if logged_in(&indicators) {
                debug!("Cookies still carry a valid session");
                return Ok(LoginSuccess {
                    csrf_token: None,
                    logout_href: indicators.logout_href,
                });
            }
            return Err(AttemptFailure::MissingToken);
        };
        let Some(token) = form.form_token().map(str::to_string) else {
            return Err(AttemptFailure::MissingToken);
        };

        let mut fields = vec![
            ("username".to_string(), self.credentials.username.clone()),
            ("password".to_string(), self.credentials.password.clone()),
            ("autologin".to_string(), "1".to_string()),
            ("viewonline".to_string(), "1".to_string()),
            ("login".to_string(), "Login".to_string()),
            ("form_token".to_string(), token.clone()),
        ];
        for name in ["sid", "creation_time"] {
            if let Some(value) = form.field(name) {
                fields.push((name.to_string(), value.to_string()));
            }
        }
        fields.push((
            "redirect".to_string(),
            form.field("redirect").unwrap_or("index.php").to_string(),
        ));

        let login_url = self.url("ucp.php?mode=login");
        let response = self
            .transport
            .post_form(&login_url, &fields, &[("Referer", login_url.clone())])
            .await
            .map_err(|e| AttemptFailure::Transport(e.to_string()))?;

        let indicators = parser::login_indicators(&response.body);
        if logged_in(&indicators) {
            return Ok(LoginSuccess {
                csrf_token: Some(token),
                logout_href: indicators.logout_href,
            });
        }

        if indicators.is_stale_form() {
            return Err(AttemptFailure::StaleForm(
                indicators.error_message.unwrap_or_default(),
            ));
        }
        if let Some(message) = indicators.error_message {
            return Err(AttemptFailure::Rejected(message));
        }
        if !response.is_success() {
            return Err(AttemptFailure::Transport(format!(
                "login form returned HTTP {}",
                response.status
            )));
        }

        debug!(
            logout_control = indicators.has_logout_control,
            login_form = indicators.has_login_form,
            "Login response matched only one marker"
        );
        Err(AttemptFailure::Inconclusive)
    }
}

fn expire(session: &mut Session) {
    if session.state == LoginState::Authenticated {
        info!("Forum session invalidated");
    }
    session.state = LoginState::Expired;
}

fn logged_in(indicators: &LoginIndicators) -> bool {
    indicators.has_logout_control && !indicators.has_login_form
}
