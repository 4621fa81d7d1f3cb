use anyhow::{anyhow, Context, Result};
use keyring::Entry;
use pagelock_core::{Credential, LockSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

const SERVICE_NAME: &str = "pagelock";
pub const TOKEN_ENV: &str = "PAGELOCK_ACCESS_TOKEN";

/// Everything needed to reopen a store, except the access token which lives
/// in the OS keyring keyed by `index_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub api_base_url: String,
    pub index_path: String,
    #[serde(default)]
    pub lock: LockSettings,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("read profile {} (run `pagelock init` first)", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parse profile {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            restrict_dir_permissions(parent);
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("write profile {}", path.display()))?;
        Ok(())
    }

    /// `PAGELOCK_ACCESS_TOKEN` wins over the keyring entry.
    pub fn credential(&self) -> Result<Credential> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            return Ok(credential_from_input(&token));
        }
        load_token(&self.index_path).map(|token| credential_from_input(&token))
    }
}

/// Surrounding whitespace would derive a different document key.
pub fn credential_from_input(raw: &str) -> Credential {
    Credential::new(raw.trim())
}

pub fn store_token(index_path: &str, credential: &Credential) -> Result<()> {
    let entry = Entry::new(SERVICE_NAME, index_path).map_err(|e| anyhow!("keyring init: {e}"))?;
    entry
        .set_password(credential.expose())
        .map_err(|e| anyhow!("store token: {e}"))?;
    Ok(())
}

pub fn load_token(index_path: &str) -> Result<String> {
    let entry = Entry::new(SERVICE_NAME, index_path).map_err(|e| anyhow!("keyring init: {e}"))?;
    entry
        .get_password()
        .map_err(|e| anyhow!("load token: {e} (set {TOKEN_ENV} to bypass the keyring)"))
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
}
