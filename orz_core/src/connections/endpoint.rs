use url::Url;

use crate::errors::CloudError;

/// A tunnel endpoint with its access token split out of the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    /// `ws://` or `wss://` URL without a query component.
    pub url: Url,
    pub token: String,
}

impl TunnelEndpoint {
    /// Turns a server-issued attach URL into a transport endpoint.
    ///
    /// `http://host/path?token=abc` becomes `ws://host/path` with token `abc`;
    /// `https` maps to `wss`. The token never stays in the connection URL.
    pub fn from_attach_url(attach_url: &str) -> Result<Self, CloudError> {
        let mut url = Url::parse(attach_url)
            .map_err(|e| CloudError::Protocol(format!("invalid attach URL: {e}")))?;

        let token = url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| CloudError::Protocol("missing token".into()))?;

        let ws_scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(CloudError::Protocol(format!(
                    "unsupported attach URL scheme '{other}'"
                )))
            }
        };
        url.set_scheme(ws_scheme)
            .map_err(|_| CloudError::Protocol(format!("cannot rewrite scheme of {url}")))?;
        url.set_query(None);

        Ok(Self { url, token })
    }
}

/// Extracts `{id}` from an attach URL shaped like `/v1/instances/{id}/attach`.
pub fn instance_id_from_attach_url(attach_url: &str) -> Option<String> {
    let url = Url::parse(attach_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .windows(3)
        .find(|w| w[0] == "instances" && w[2] == "attach" && !w[1].is_empty())
        .map(|w| w[1].to_string())
}
