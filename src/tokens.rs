//! Harvested token storage
//!
//! Append-only sink for access/refresh token pairs, one line per successful
//! user. The target file is removed at startup so every run starts clean.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A harvested token pair. Created only on a fully successful attempt,
/// appended to the sink, never mutated or re-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub username: Option<String>,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to create token sink {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append to token sink {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only persistent store of harvested token pairs.
pub struct TokenSink {
    path: PathBuf,
    file: File,
    include_username: bool,
}

impl TokenSink {
    /// Create the sink, removing any pre-existing file at `path`.
    pub fn create(path: &Path, include_username: bool) -> Result<Self, SinkError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|source| SinkError::Create {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Create {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            include_username,
        })
    }

    /// Append one token pair as `accessToken;refreshToken[;username]`.
    pub fn append(&mut self, pair: &TokenPair) -> Result<(), SinkError> {
        let mut line = format!("{};{}", pair.access_token, pair.refresh_token);
        if self.include_username {
            if let Some(username) = &pair.username {
                line.push(';');
                line.push_str(username);
            }
        }
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|source| SinkError::Append {
                path: self.path.clone(),
                source,
            })
    }
}
