//! Persistent user configuration.
//!
//! A small JSON document. Only `kindleEmail` is owned by this crate; any
//! other keys in the file are kept as they are.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const APP_NAME: &str = "bookdrop";
const CONFIG_FILENAME: &str = "config.json";

/// Key holding the Kindle delivery address.
pub const KINDLE_EMAIL_KEY: &str = "kindleEmail";

/// `<config dir>/bookdrop/config.json`, or `./config.json` when the platform
/// has no config directory.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|config| config.join(APP_NAME).join(CONFIG_FILENAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME))
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    document: Map<String, Value>,
}

impl ConfigStore {
    /// Read the document at `path`. A missing file is an empty document.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => map,
                _ => {
                    return Err(Error::Config(format!(
                        "{} is not a JSON object",
                        path.display()
                    )));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}", path.display());
                Map::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kindle_email(&self) -> Option<&str> {
        self.document
            .get(KINDLE_EMAIL_KEY)
            .and_then(Value::as_str)
            .filter(|email| !email.is_empty())
    }

    /// Set the Kindle address. The value must parse as an email address.
    pub fn set_kindle_email(&mut self, email: &str) -> Result<()> {
        let email = email.trim();
        email
            .parse::<lettre::Address>()
            .map_err(|e| Error::Config(format!("invalid email address {email:?}: {e}")))?;
        self.document
            .insert(KINDLE_EMAIL_KEY.to_string(), Value::String(email.to_string()));
        Ok(())
    }

    /// Write the whole document back, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.document)?;
        fs::write(&self.path, content)?;
        debug!("Saved config to {}", self.path.display());
        Ok(())
    }
}
