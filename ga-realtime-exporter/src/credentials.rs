// GA Realtime Exporter - Service account credentials
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Google service account key file.
//!
//! Expects the JSON downloaded from the Cloud console under
//! "Service account keys". The account's email must also be granted read
//! access on the Analytics view.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default credentials path, relative to the working directory.
pub const DEFAULT_CREDENTIALS_PATH: &str = "./config/ga_creds.json";

/// Fields of a service account key used for the JWT bearer flow.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    pub private_key_id: String,
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Read and parse a key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CredentialsError> {
        let key: Self = serde_json::from_str(raw)?;
        for (field, value) in [
            ("client_email", &key.client_email),
            ("private_key", &key.private_key),
            ("token_uri", &key.token_uri),
        ] {
            if value.trim().is_empty() {
                return Err(CredentialsError::MissingField(field));
            }
        }
        Ok(key)
    }
}

/// Credential loading errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid credentials JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Credentials field is empty: {0}")]
    MissingField(&'static str),
}
