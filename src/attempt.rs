//! Per-user login state machine
//!
//! Drives the four-phase flow for one user: open the authorization page,
//! submit credentials and extract the authorization code, exchange the code
//! for tokens, record the result. Each phase is lap-timed; a phase failure is
//! a typed value that short-circuits the remaining phases carrying the real
//! causing error, closes the owning browser session, and leaves the batch
//! free to continue with the next user.

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::browser::{BrowserError, LoginPage};
use crate::credentials::Credential;
use crate::metrics::{LapTimer, Phase, TimingRecorder};
use crate::settings::Settings;
use crate::tokens::{TokenPair, TokenSink};

/// Result of one attempt, success or not. A failed attempt never aborts the
/// batch; only [`SessionLost`] does.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub user_index: usize,
    pub username: String,
    pub succeeded: bool,
    pub failed_phase: Option<Phase>,
    pub error: Option<String>,
}

/// The browser became unusable outside the attempt's own control.
/// Fatal for the whole batch.
#[derive(Error, Debug)]
#[error("browser session lost: {0}")]
pub struct SessionLost(pub String);

/// Token endpoint failures, all attributed to the `get-token` phase.
#[derive(Error, Debug)]
pub enum TokenExchangeError {
    #[error("token endpoint returned {status}: [{body}]")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed token response: [{body}]")]
    MalformedBody { body: String },

    #[error("token request failed: {0}")]
    Request(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// One user's login attempt. Owns the session exclusively for its lifetime.
pub struct LoginAttempt<'a, D: LoginPage> {
    session: &'a D,
    http: &'a reqwest::Client,
    settings: &'a Settings,
    user_index: usize,
    credential: &'a Credential,
}

impl<'a, D: LoginPage> LoginAttempt<'a, D> {
    pub fn new(
        session: &'a D,
        http: &'a reqwest::Client,
        settings: &'a Settings,
        user_index: usize,
        credential: &'a Credential,
    ) -> Self {
        Self {
            session,
            http,
            settings,
            user_index,
            credential,
        }
    }

    /// Run the attempt to a terminal state.
    ///
    /// Phase metrics are recorded only for phases that completed; a failed
    /// phase's elapsed time goes into the outcome's report line instead.
    pub async fn run(
        &self,
        recorder: &mut TimingRecorder,
        sink: &mut TokenSink,
    ) -> Result<AttemptOutcome, SessionLost> {
        let username = &self.credential.username;
        let state = Uuid::new_v4().to_string();

        // Phase 1: open the authorization page and wait for the login control.
        let mut timer = LapTimer::start();
        info!("{username}: open-login-page...");
        let start_url = self.settings.authorize_url(&state);
        let opened = async {
            self.session.navigate(&start_url).await?;
            self.session
                .wait_for_clickable(&self.settings.login_button_selector, self.settings.wait_timeout)
                .await
        }
        .await;
        if let Err(e) = opened {
            return self.browser_failure(Phase::OpenLoginPage, &timer, e).await;
        }
        let open_ms = timer.elapsed_ms();
        recorder.record(Phase::OpenLoginPage, open_ms);
        self.report_success(Phase::OpenLoginPage, open_ms);

        // Phase 2: submit credentials, wait for the redirect carrying our
        // state token, extract the authorization code from its query string.
        timer.reset();
        info!("{username}: get-code...");
        let redirected = async {
            self.session
                .fill_and_submit_login(username, &self.credential.password)
                .await?;
            self.session
                .wait_for_url_contains(&state, self.settings.wait_timeout)
                .await?;
            self.session.current_url().await
        }
        .await;
        let redirect_url = match redirected {
            Ok(url) => url,
            Err(e) => return self.browser_failure(Phase::GetCode, &timer, e).await,
        };
        let Some(code) = extract_code(&redirect_url) else {
            let elapsed = timer.elapsed_ms();
            return self
                .fail(
                    Phase::GetCode,
                    elapsed,
                    format!("authorization code missing from redirect URL: {redirect_url}"),
                )
                .await;
        };
        let get_code_ms = timer.elapsed_ms();
        recorder.record(Phase::GetCode, get_code_ms);
        self.report_success(Phase::GetCode, get_code_ms);

        // Phase 3: exchange the code for a token pair.
        timer.reset();
        info!("{username}: get-token...");
        let pair = match self.exchange_code(&code).await {
            Ok(pair) => pair,
            Err(e) => {
                let elapsed = timer.elapsed_ms();
                return self.fail(Phase::GetToken, elapsed, e.to_string()).await;
            }
        };
        let get_token_ms = timer.elapsed_ms();

        // Complete: persist the pair, then record get-token and the derived
        // login duration.
        if let Err(e) = sink.append(&pair) {
            return self.fail(Phase::GetToken, get_token_ms, e.to_string()).await;
        }
        recorder.record(Phase::GetToken, get_token_ms);
        self.report_success(Phase::GetToken, get_token_ms);
        let login_ms = get_code_ms + get_token_ms;
        recorder.record(Phase::Login, login_ms);
        self.report_success(Phase::Login, login_ms);

        Ok(AttemptOutcome {
            user_index: self.user_index,
            username: username.clone(),
            succeeded: true,
            failed_phase: None,
            error: None,
        })
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenPair, TokenExchangeError> {
        let response = self
            .http
            .post(self.settings.token_url())
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.settings.client_id.as_str()),
                ("code", code),
                ("redirect_uri", self.settings.redirect_url.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TokenExchangeError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenExchangeError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(TokenExchangeError::Status { status, body });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| TokenExchangeError::MalformedBody { body: body.clone() })?;
        match (parsed.access_token, parsed.refresh_token) {
            (Some(access_token), Some(refresh_token)) => Ok(TokenPair {
                access_token,
                refresh_token,
                username: Some(self.credential.username.clone()),
            }),
            _ => Err(TokenExchangeError::MalformedBody { body }),
        }
    }

    /// Browser-level failure: session loss aborts the batch, everything else
    /// becomes a phase failure.
    async fn browser_failure(
        &self,
        phase: Phase,
        timer: &LapTimer,
        error: BrowserError,
    ) -> Result<AttemptOutcome, SessionLost> {
        let elapsed = timer.elapsed_ms();
        match error {
            BrowserError::ConnectionLost(msg) => Err(SessionLost(msg)),
            other => self.fail(phase, elapsed, other.to_string()).await,
        }
    }

    /// Terminal phase failure: report, capture artifacts, close the session.
    async fn fail(
        &self,
        phase: Phase,
        elapsed_ms: u64,
        error: String,
    ) -> Result<AttemptOutcome, SessionLost> {
        let username = &self.credential.username;
        error!("[ERROR] {username}-{phase}:{elapsed_ms}ms - {error}");
        self.capture_artifacts(phase).await;
        let _ = self.session.close().await;
        Ok(AttemptOutcome {
            user_index: self.user_index,
            username: username.clone(),
            succeeded: false,
            failed_phase: Some(phase),
            error: Some(error),
        })
    }

    /// Best-effort screenshot and console-log capture for post-mortem.
    async fn capture_artifacts(&self, phase: Phase) {
        let stem = format!("{}-{}", self.credential.username, phase);

        let screenshot_path = std::path::PathBuf::from(format!("{stem}.png"));
        if let Err(e) = self.session.screenshot(&screenshot_path).await {
            warn!("could not capture screenshot {}: {e}", screenshot_path.display());
        }

        let logs = self.session.console_logs().await;
        if !logs.is_empty() {
            let log_path = format!("{stem}.log");
            if let Err(e) = std::fs::write(&log_path, logs.join("\n")) {
                warn!("could not write browser log {log_path}: {e}");
            }
        }
    }

    fn report_success(&self, phase: Phase, elapsed_ms: u64) {
        info!("[OK]    {}-{phase}:{elapsed_ms}ms", self.credential.username);
    }
}

/// Pull the `code` query parameter out of the redirect URL.
fn extract_code(redirect_url: &str) -> Option<String> {
    let url = Url::parse(redirect_url).ok()?;
    url.query_pairs()
        .find(|(key, value)| key == "code" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}
