/*
 * Robin mail transfer agent
 *
 * Copyright (C) 2024 - the Robin authors
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

pub mod client;
pub mod error;
pub mod server;
pub mod webhooks;

pub use client::{ClientConfig, Route};
pub use error::ConfigError;
pub use server::ServerConfig;
pub use webhooks::{Webhook, Webhooks};

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A JSON5 configuration document with a well-known file name.
pub trait Config: Default + serde::de::DeserializeOwned + Sized {
    /// Name of the document inside the configuration directory.
    const FILE_NAME: &'static str;

    /// Parse a document. The json5 error carries the offending location.
    fn from_json5(raw: &str) -> ConfigResult<Self> {
        Ok(json5::from_str(raw)?)
    }

    fn from_file(path: &impl AsRef<std::path::Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|error| ConfigError::FileOpen(path.into(), error))?;
        Self::from_json5(&raw)
    }

    /// Load the document from its well-known name under `dir`, falling back
    /// to the defaults when the file does not exist.
    fn from_dir(dir: &impl AsRef<std::path::Path>) -> ConfigResult<Self> {
        let path = dir.as_ref().join(Self::FILE_NAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }
}

pub(crate) fn default_hostname() -> String {
    hostname::get().map_or_else(
        |_| "localhost".to_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}
