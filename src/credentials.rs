//! Credentials source
//!
//! A line-oriented `username=password` file, consumed once at startup into an
//! immutable ordered store. A user's position in the file is its enrollment
//! order and drives the batch iteration order.

use std::path::Path;

use crate::settings::ConfigError;

/// One username/password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Immutable ordered list of credentials.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    entries: Vec<Credential>,
}

impl CredentialStore {
    /// Load credentials from a properties file.
    ///
    /// Each non-blank line is split on the first `=` (passwords may contain
    /// `=`), both sides trimmed. A non-blank line without `=` is a
    /// startup-fatal configuration error, not a per-attempt failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((username, password)) = line.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    path: path.to_path_buf(),
                    line_no: idx + 1,
                    line: line.to_string(),
                });
            };
            entries.push(Credential {
                username: username.trim().to_string(),
                password: password.trim().to_string(),
            });
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate credentials in enrollment order.
    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.entries.iter()
    }
}
