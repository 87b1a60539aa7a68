//! authload CLI
//!
//! Reads configuration from the environment, runs one batch of browser-driven
//! OAuth2 logins, and exits 0 on normal completion (even with per-user
//! failures), 1 when the browser is lost mid-batch, 2 on a startup
//! configuration error.

use tracing::error;

use authload::browser::{BrowserSessionConfig, ChromeSessionFactory};
use authload::credentials::CredentialStore;
use authload::metrics::TimingRecorder;
use authload::runner::BatchRunner;
use authload::settings::Settings;
use authload::tokens::TokenSink;

#[tokio::main]
async fn main() {
    authload::init_logging();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let credentials = match CredentialStore::load(&settings.users_file) {
        Ok(store) => store,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let mut sink = match TokenSink::create(&settings.tokens_file, settings.include_username) {
        Ok(sink) => sink,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let runner = match BatchRunner::new(settings.clone()) {
        Ok(runner) => runner,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let factory = ChromeSessionFactory::new(BrowserSessionConfig::from_settings(&settings));
    let mut recorder = TimingRecorder::new();

    if let Err(e) = runner
        .run_all(&factory, &credentials, &mut recorder, &mut sink)
        .await
    {
        error!("{e}");
        std::process::exit(1);
    }
}
