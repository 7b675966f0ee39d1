//! Local storage for the username attributed to cache writes.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::errors::IdentityError;

const IDENTITY_FILE_NAME: &str = "user_config.json";

#[derive(Debug, Default, serde::Deserialize, serde::Serialize)]
struct IdentityFile {
    #[serde(default)]
    username: String,
}

pub fn identity_file_path(config_root: &Path) -> PathBuf {
    config_root.join(IDENTITY_FILE_NAME)
}

/// Returns the stored username, or `None` when the file is absent, unreadable, or blank.
pub fn load_username(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<IdentityFile>(&text) {
        Ok(identity) => {
            let username = identity.username.trim().to_string();
            if username.is_empty() {
                return None;
            }
            info!("Loaded username: {username}");
            Some(username)
        }
        Err(err) => {
            warn!("Failed to load username config {}: {}", path.display(), err);
            None
        }
    }
}

pub fn save_username(path: &Path, username: &str) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let identity = IdentityFile {
        username: username.trim().to_string(),
    };
    std::fs::write(path, serde_json::to_string(&identity)?)?;
    info!("Username saved locally: {}", identity.username);
    Ok(())
}

/// Loads the username, prompting once on `input` and persisting the answer when absent.
pub fn get_or_request_username<R: BufRead, W: Write>(
    path: &Path,
    input: &mut R,
    prompt: &mut W,
) -> Result<String, IdentityError> {
    if let Some(username) = load_username(path) {
        return Ok(username);
    }
    write!(prompt, "Please enter your username: ")?;
    prompt.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let username = line.trim();
    if username.is_empty() {
        return Err(IdentityError::Missing);
    }
    save_username(path, username)?;
    Ok(username.to_string())
}
