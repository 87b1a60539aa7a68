//! Batch orchestration
//!
//! Iterates the credential store strictly sequentially, one fresh browser
//! session and one login attempt per user. A single user's failure never
//! aborts the batch; losing the browser itself does.

use std::collections::BTreeMap;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info};

use crate::attempt::{AttemptOutcome, LoginAttempt, SessionLost};
use crate::browser::{BrowserError, LoginPage, SessionFactory};
use crate::credentials::CredentialStore;
use crate::metrics::{Phase, PhaseSummary, TimingRecorder};
use crate::settings::{ConfigError, Settings};
use crate::tokens::TokenSink;

/// Whole-batch fatal errors. These bypass the per-user loop and terminate
/// the process with a non-zero exit code.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    SessionLost(#[from] SessionLost),

    #[error("failed to launch browser session: {0}")]
    Launch(BrowserError),
}

/// Aggregate result of one batch run.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<AttemptOutcome>,
    /// True if any attempt failed.
    pub failed: bool,
    pub total_elapsed_ms: u64,
    /// Per-phase statistics; present only when every attempt succeeded.
    pub summaries: Option<BTreeMap<Phase, PhaseSummary>>,
}

/// Runs the full (possibly capped) batch of login attempts.
pub struct BatchRunner {
    settings: Settings,
    http: reqwest::Client,
}

impl BatchRunner {
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(settings.wait_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { settings, http })
    }

    /// Process every credential in order, capped by `MAX_USERS` when it is
    /// non-negative. Emits per-phase summary statistics if all attempts
    /// succeeded, otherwise a single global failure record with the total
    /// batch wall-clock time.
    pub async fn run_all<F: SessionFactory>(
        &self,
        factory: &F,
        credentials: &CredentialStore,
        recorder: &mut TimingRecorder,
        sink: &mut TokenSink,
    ) -> Result<BatchReport, RunError> {
        let batch_start = Instant::now();
        let cap = if self.settings.max_users >= 0 {
            credentials.len().min(self.settings.max_users as usize)
        } else {
            credentials.len()
        };

        let mut outcomes = Vec::with_capacity(cap);
        let mut failed = false;

        for (index, credential) in credentials.iter().take(cap).enumerate() {
            info!("Logging user {} in", credential.username);
            let session = factory.create().await.map_err(RunError::Launch)?;
            let attempt =
                LoginAttempt::new(&session, &self.http, &self.settings, index, credential);
            let result = attempt.run(recorder, sink).await;
            // A failed attempt has already closed its session; the success
            // path disposes it here. close() is idempotent.
            let _ = session.close().await;
            let outcome = result?;
            failed |= !outcome.succeeded;
            outcomes.push(outcome);
        }

        let total_elapsed_ms = batch_start.elapsed().as_millis() as u64;
        let summaries = if failed {
            error!("[ERROR] global:{total_elapsed_ms}ms - Something went wrong.");
            None
        } else {
            info!("All {} users done.", outcomes.len());
            let all = recorder.summarize_all();
            for (phase, summary) in &all {
                info!(
                    "{phase}-time-stats:count={};min={};med={};max={}",
                    summary.count, summary.min, summary.median, summary.max
                );
            }
            Some(all)
        };

        Ok(BatchReport {
            outcomes,
            failed,
            total_elapsed_ms,
            summaries,
        })
    }
}
