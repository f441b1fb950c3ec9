use std::{env, path::PathBuf, time::Duration};

use url::Url;

use crate::errors::CloudError;

pub const API_URL_ENV: &str = "ORZBOB_API_URL";
pub const DEFAULT_API_URL: &str = "http://api.orzbob.com";

/// Settings for talking to the control plane.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub api_url: Url,
    /// Upper bound for every REST call.
    pub request_timeout: Duration,
    /// Upper bound for the tunnel handshake.
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Overrides the platform config dir location of the credential file.
    pub token_path: Option<PathBuf>,
}

impl CloudConfig {
    pub fn new(api_url: &str) -> Result<Self, CloudError> {
        let api_url = Url::parse(api_url)
            .map_err(|e| CloudError::Config(format!("invalid API URL '{api_url}': {e}")))?;
        Ok(Self {
            api_url,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(30),
            token_path: None,
        })
    }

    /// Reads `ORZBOB_API_URL`, falling back to the public control plane.
    pub fn from_env() -> Result<Self, CloudError> {
        match env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::new(DEFAULT_API_URL),
        }
    }

    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// `{api_url}/v1/{segments...}`, each segment percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, CloudError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| CloudError::Config(format!("API URL {} cannot be a base", self.api_url)))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }
}
