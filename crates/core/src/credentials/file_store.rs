use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::Token;
use super::store::TokenStore;
use crate::errors::{Error, Result};

/// On-disk layout: `{"access_token", "expires_at", "created_at"}`.
#[derive(Serialize, Deserialize)]
struct TokenFile {
    access_token: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

/// Keeps the token in a small JSON file. Writes go to a sibling temp file
/// that is then renamed over the target, so readers never see a partial file.
pub struct JsonFileTokenStore {
    path: PathBuf,
}

impl JsonFileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl TokenStore for JsonFileTokenStore {
    async fn load(&self) -> Result<Option<Token>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let file: TokenFile = serde_json::from_str(&raw).map_err(|e| {
            Error::TokenStore(format!("{} is not a token file: {}", self.path.display(), e))
        })?;
        Ok(Some(Token {
            value: file.access_token,
            issued_at: file.created_at,
            expires_at: file.expires_at,
        }))
    }

    async fn save(&self, token: &Token) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = TokenFile {
            access_token: token.value.clone(),
            expires_at: token.expires_at,
            created_at: token.issued_at,
        };
        let body = serde_json::to_string_pretty(&file)?;
        let temp = self.temp_path();
        fs::write(&temp, body)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
