//! End-to-end batch behavior against a scripted browser driver and a mocked
//! token endpoint.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use authload::browser::{BrowserError, LoginPage, SessionFactory};
use authload::credentials::CredentialStore;
use authload::metrics::{Phase, TimingRecorder};
use authload::runner::{BatchRunner, RunError};
use authload::settings::Settings;
use authload::tokens::TokenSink;

/// What one scripted session does when the attempt drives it.
#[derive(Clone)]
enum Script {
    /// Full happy path; the redirect carries this authorization code.
    Success { code: String },
    /// The login control never becomes clickable.
    LoginPageTimeout,
    /// Redirect arrives without a `code` parameter.
    RedirectWithoutCode,
    /// The browser dies as soon as the attempt touches it.
    LoseSession,
}

struct ScriptedPage {
    script: Script,
    redirect_url: Mutex<Option<String>>,
    closes: Arc<AtomicUsize>,
}

impl LoginPage for ScriptedPage {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        if matches!(self.script, Script::LoseSession) {
            return Err(BrowserError::ConnectionLost("window closed".into()));
        }
        // Echo the attempt's state parameter back the way the relying party
        // would, so the redirect URL correlates with this attempt.
        let parsed = url::Url::parse(url).expect("authorize URL must parse");
        let state = parsed
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("authorize URL must carry a state parameter");
        let redirect = match &self.script {
            Script::Success { code } => {
                format!("http://rp.test/api/status?state={state}&code={code}")
            }
            _ => format!("http://rp.test/api/status?state={state}"),
        };
        *self.redirect_url.lock().unwrap() = Some(redirect);
        Ok(())
    }

    async fn wait_for_clickable(
        &self,
        _selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        match self.script {
            Script::LoginPageTimeout => Err(BrowserError::Timeout(format!(
                "element #kc-login not clickable within {}s",
                timeout.as_secs()
            ))),
            _ => Ok(()),
        }
    }

    async fn wait_for_url_contains(
        &self,
        _needle: &str,
        _timeout: Duration,
    ) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn fill_and_submit_login(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.redirect_url
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BrowserError::ConnectionLost("no current URL".into()))
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn screenshot(&self, _path: &Path) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn console_logs(&self) -> Vec<String> {
        Vec::new()
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Hands out one scripted session per attempt, in order.
struct ScriptedFactory {
    scripts: Vec<Script>,
    next: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts,
            next: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }
}

impl SessionFactory for ScriptedFactory {
    type Session = ScriptedPage;

    async fn create(&self) -> Result<ScriptedPage, BrowserError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let script = self
            .scripts
            .get(index)
            .cloned()
            .expect("factory asked for more sessions than scripted");
        Ok(ScriptedPage {
            script,
            redirect_url: Mutex::new(None),
            closes: self.closes.clone(),
        })
    }
}

fn success(code: &str) -> Script {
    Script::Success {
        code: code.to_string(),
    }
}

fn credentials(n: usize) -> (tempfile::NamedTempFile, CredentialStore) {
    let mut content = String::new();
    for i in 0..n {
        content.push_str(&format!("user{i}=secret{i}\n"));
    }
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), content).unwrap();
    let store = CredentialStore::load(file.path()).unwrap();
    (file, store)
}

struct Harness {
    settings: Settings,
    _tokens_dir: tempfile::TempDir,
    tokens_path: std::path::PathBuf,
}

impl Harness {
    fn new(server: &MockServer, max_users: i64, include_username: bool) -> Self {
        let tokens_dir = tempfile::tempdir().unwrap();
        let tokens_path = tokens_dir.path().join("user.tokens");
        let base = server.uri();
        let settings = Settings {
            redirect_url: format!("{base}/api/status"),
            auth_server_address: base,
            tokens_file: tokens_path.clone(),
            include_username,
            max_users,
            ..Settings::default()
        };
        Self {
            settings,
            _tokens_dir: tokens_dir,
            tokens_path,
        }
    }

    fn sink(&self) -> TokenSink {
        TokenSink::create(&self.tokens_path, self.settings.include_username).unwrap()
    }

    fn sink_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.tokens_path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-tok",
            "refresh_token": "refresh-tok",
            "token_type": "Bearer",
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn uncapped_batch_processes_every_user() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let harness = Harness::new(&server, -1, false);
    let (_file, store) = credentials(3);
    let factory = ScriptedFactory::new(vec![success("c0"), success("c1"), success("c2")]);
    let runner = BatchRunner::new(harness.settings.clone()).unwrap();
    let mut recorder = TimingRecorder::new();
    let mut sink = harness.sink();

    let report = runner
        .run_all(&factory, &store, &mut recorder, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert!(!report.failed);
    assert!(report.outcomes.iter().all(|o| o.succeeded));

    // All-success: stats present for every phase, including the derived login.
    let summaries = report.summaries.expect("stats expected on full success");
    for phase in [Phase::OpenLoginPage, Phase::GetCode, Phase::GetToken, Phase::Login] {
        assert_eq!(summaries.get(&phase).unwrap().count, 3, "{phase}");
    }

    let lines = harness.sink_lines();
    assert_eq!(lines, vec!["access-tok;refresh-tok"; 3]);

    // One session per user, each disposed.
    assert_eq!(factory.close_count(), 3);
}

#[tokio::test]
async fn max_users_caps_attempts_in_input_order() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let harness = Harness::new(&server, 2, true);
    let (_file, store) = credentials(5);
    let factory = ScriptedFactory::new(vec![success("c0"), success("c1")]);
    let runner = BatchRunner::new(harness.settings.clone()).unwrap();
    let mut recorder = TimingRecorder::new();
    let mut sink = harness.sink();

    let report = runner
        .run_all(&factory, &store, &mut recorder, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    let users: Vec<_> = report.outcomes.iter().map(|o| o.username.as_str()).collect();
    assert_eq!(users, ["user0", "user1"]);

    let lines = harness.sink_lines();
    assert_eq!(
        lines,
        vec![
            "access-tok;refresh-tok;user0",
            "access-tok;refresh-tok;user1"
        ]
    );
}

#[tokio::test]
async fn max_users_zero_processes_nothing() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server, 0, false);
    let (_file, store) = credentials(3);
    let factory = ScriptedFactory::new(Vec::new());
    let runner = BatchRunner::new(harness.settings.clone()).unwrap();
    let mut recorder = TimingRecorder::new();
    let mut sink = harness.sink();

    let report = runner
        .run_all(&factory, &store, &mut recorder, &mut sink)
        .await
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert!(!report.failed);
    assert!(harness.sink_lines().is_empty());
}

#[tokio::test]
async fn one_failed_token_exchange_does_not_abort_the_batch() {
    let server = MockServer::start().await;
    // User 2's code is rejected; everything else succeeds. More specific
    // mock first: wiremock matches in mount order.
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=bad-code"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
        .mount(&server)
        .await;
    mount_token_endpoint(&server).await;

    let harness = Harness::new(&server, -1, false);
    let (_file, store) = credentials(3);
    let factory = ScriptedFactory::new(vec![success("c0"), success("bad-code"), success("c2")]);
    let runner = BatchRunner::new(harness.settings.clone()).unwrap();
    let mut recorder = TimingRecorder::new();
    let mut sink = harness.sink();

    let report = runner
        .run_all(&factory, &store, &mut recorder, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert!(report.failed);
    assert!(report.outcomes[0].succeeded);
    assert!(!report.outcomes[1].succeeded);
    assert_eq!(report.outcomes[1].failed_phase, Some(Phase::GetToken));
    assert!(report.outcomes[1]
        .error
        .as_deref()
        .unwrap()
        .contains("invalid_grant"));
    assert!(report.outcomes[2].succeeded);

    // Stats suppressed, users 1 and 3 harvested.
    assert!(report.summaries.is_none());
    assert_eq!(harness.sink_lines().len(), 2);

    // Failed phases contribute no get-token/login samples.
    assert_eq!(recorder.sample_count(Phase::GetToken), 2);
    assert_eq!(recorder.sample_count(Phase::Login), 2);
    assert_eq!(recorder.sample_count(Phase::GetCode), 3);
}

#[tokio::test]
async fn login_page_timeout_is_attributed_to_first_phase() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server, -1, false);
    let (_file, store) = credentials(1);
    let factory = ScriptedFactory::new(vec![Script::LoginPageTimeout]);
    let runner = BatchRunner::new(harness.settings.clone()).unwrap();
    let mut recorder = TimingRecorder::new();
    let mut sink = harness.sink();

    let report = runner
        .run_all(&factory, &store, &mut recorder, &mut sink)
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert!(!outcome.succeeded);
    assert_eq!(outcome.failed_phase, Some(Phase::OpenLoginPage));
    assert!(outcome.error.as_deref().unwrap().contains("timeout"));

    // A phase that fails contributes no metric samples at all.
    for phase in [Phase::OpenLoginPage, Phase::GetCode, Phase::GetToken, Phase::Login] {
        assert_eq!(recorder.sample_count(phase), 0, "{phase}");
    }
    assert!(harness.sink_lines().is_empty());

    // Closed once by the failing attempt and once by the runner's
    // unconditional disposal before the next attempt would start.
    assert_eq!(factory.close_count(), 2);
}

#[tokio::test]
async fn missing_code_in_redirect_fails_get_code() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server, -1, false);
    let (_file, store) = credentials(1);
    let factory = ScriptedFactory::new(vec![Script::RedirectWithoutCode]);
    let runner = BatchRunner::new(harness.settings.clone()).unwrap();
    let mut recorder = TimingRecorder::new();
    let mut sink = harness.sink();

    let report = runner
        .run_all(&factory, &store, &mut recorder, &mut sink)
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.failed_phase, Some(Phase::GetCode));
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .contains("authorization code missing"));

    // The first phase completed and was recorded; the failed one was not.
    assert_eq!(recorder.sample_count(Phase::OpenLoginPage), 1);
    assert_eq!(recorder.sample_count(Phase::GetCode), 0);
}

#[tokio::test]
async fn malformed_token_body_fails_get_token() {
    let server = MockServer::start().await;
    // 2xx but missing refresh_token.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "access-tok" })),
        )
        .mount(&server)
        .await;

    let harness = Harness::new(&server, -1, false);
    let (_file, store) = credentials(1);
    let factory = ScriptedFactory::new(vec![success("c0")]);
    let runner = BatchRunner::new(harness.settings.clone()).unwrap();
    let mut recorder = TimingRecorder::new();
    let mut sink = harness.sink();

    let report = runner
        .run_all(&factory, &store, &mut recorder, &mut sink)
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.failed_phase, Some(Phase::GetToken));
    assert!(outcome.error.as_deref().unwrap().contains("malformed"));
    assert!(harness.sink_lines().is_empty());
}

#[tokio::test]
async fn session_loss_aborts_the_whole_batch() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let harness = Harness::new(&server, -1, false);
    let (_file, store) = credentials(3);
    let factory =
        ScriptedFactory::new(vec![success("c0"), Script::LoseSession, success("c2")]);
    let runner = BatchRunner::new(harness.settings.clone()).unwrap();
    let mut recorder = TimingRecorder::new();
    let mut sink = harness.sink();

    let err = runner
        .run_all(&factory, &store, &mut recorder, &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::SessionLost(_)));

    // User 1 completed before the loss; user 3 never ran.
    assert_eq!(harness.sink_lines().len(), 1);
}
