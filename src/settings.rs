//! Run configuration
//!
//! All knobs come from environment variables, read once at startup.
//! The resulting `Settings` value is immutable for the lifetime of the run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default OAuth2 client id (matches the reference auth server deployment).
const DEFAULT_CLIENT_ID: &str = "740650a2-9c44-4db5-b067-a3d1b2cd2d01";

/// Startup-fatal configuration errors. No attempt runs after one of these.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line_no}: malformed credentials line (expected username=password): {line:?}")]
    MalformedLine {
        path: PathBuf,
        line_no: usize,
        line: String,
    },

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: String, value: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the authorization server.
    pub auth_server_address: String,
    /// OAuth2 client id sent on the authorize and token requests.
    pub client_id: String,
    /// Redirect URI the relying party bounces the browser back to.
    pub redirect_url: String,
    /// Credentials source, one `username=password` per line.
    pub users_file: PathBuf,
    /// Token sink file, truncated at startup.
    pub tokens_file: PathBuf,
    /// Append `;username` to each token sink line.
    pub include_username: bool,
    /// Cap on the number of attempts; negative means unlimited.
    pub max_users: i64,
    /// Bounded wait for element-clickable and URL-match conditions.
    pub wait_timeout: Duration,
    /// Run Chrome headless.
    pub headless: bool,
    /// CSS selector for the login control that marks the page as ready.
    pub login_button_selector: String,
    /// CSS selector for the username input.
    pub username_selector: String,
    /// CSS selector for the password input.
    pub password_selector: String,
}

impl Default for Settings {
    fn default() -> Self {
        let base = "http://localhost:8089".to_string();
        Self {
            redirect_url: format!("{base}/api/status"),
            auth_server_address: base,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            users_file: PathBuf::from("users.properties"),
            tokens_file: PathBuf::from("user.tokens"),
            include_username: false,
            max_users: -1,
            wait_timeout: Duration::from_secs(60),
            headless: true,
            // Keycloak login form ids
            login_button_selector: "#kc-login".to_string(),
            username_selector: "#username".to_string(),
            password_selector: "#password".to_string(),
        }
    }
}

impl Settings {
    /// Read settings from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(base) = getenv("AUTH_SERVER_ADDRESS") {
            settings.redirect_url = format!("{base}/api/status");
            settings.auth_server_address = base;
        }
        if let Some(client_id) = getenv("AUTH_CLIENT_ID") {
            settings.client_id = client_id;
        }
        if let Some(redirect) = getenv("AUTH_REDIRECT_URL") {
            settings.redirect_url = redirect;
        }
        if let Some(path) = getenv("USERS_PROPERTIES_FILE") {
            settings.users_file = PathBuf::from(path);
        }
        if let Some(path) = getenv("USER_TOKENS_FILE") {
            settings.tokens_file = PathBuf::from(path);
        }
        if let Some(value) = getenv("USER_TOKENS_INCLUDE_USERNAME") {
            settings.include_username = parse_bool("USER_TOKENS_INCLUDE_USERNAME", value)?;
        }
        if let Some(value) = getenv("MAX_USERS") {
            settings.max_users = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "MAX_USERS".into(),
                value,
            })?;
        }
        if let Some(value) = getenv("LOGIN_TIMEOUT_SECS") {
            let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "LOGIN_TIMEOUT_SECS".into(),
                value,
            })?;
            settings.wait_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = getenv("BROWSER_HEADLESS") {
            settings.headless = parse_bool("BROWSER_HEADLESS", value)?;
        }

        Ok(settings)
    }

    /// Authorization endpoint URL for one attempt's `state` token.
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/authorize?response_type=code&client_id={}&redirect_uri={}&state={}",
            self.auth_server_address, self.client_id, self.redirect_url, state
        )
    }

    /// Token exchange endpoint URL.
    pub fn token_url(&self) -> String {
        format!("{}/token", self.auth_server_address)
    }
}

fn getenv(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Boolean envs are fail-fast like the numeric ones: anything other than
/// true/false (case-insensitive) is a configuration error.
fn parse_bool(name: &str, value: String) -> Result<bool, ConfigError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ConfigError::InvalidEnv {
            name: name.into(),
            value,
        })
    }
}
