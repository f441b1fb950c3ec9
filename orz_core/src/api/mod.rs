//! Thin REST wrapper around the control plane's instance endpoints.
//!
//! Apart from the token exchange, every call loads the credential first and
//! gives up before touching the network when there is none. One call, one
//! HTTP request; nothing is cached.

pub mod types;

use chrono::Duration;
use log::debug;
use orz_storage::{Credential, TokenStore};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::CloudConfig;
use crate::errors::CloudError;
pub use types::{InstanceStatus, RemoteInstance};
use types::{CreateInstanceRequest, ExchangeRequest, ExchangeResponse, InstanceList};

/// Lifetime the control plane gives exchanged API tokens.
const API_TOKEN_TTL_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct InstanceClient {
    http: Client,
    config: CloudConfig,
    tokens: TokenStore,
}

impl InstanceClient {
    pub fn new(config: CloudConfig, tokens: TokenStore) -> Result<Self, CloudError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("orz/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Trades a GitHub access token for a control-plane API token.
    ///
    /// Needs no stored credential; the result is not persisted here.
    pub async fn exchange_token(&self, github_token: &str) -> Result<Credential, CloudError> {
        let url = self.config.endpoint(&["auth", "exchange"])?;
        let req = self.http.post(url).json(&ExchangeRequest { github_token });
        let res: ExchangeResponse = decode(self.send(req).await?).await?;
        if res.token.is_empty() {
            return Err(CloudError::Protocol("token exchange returned no token".into()));
        }
        debug!("Exchanged token for org '{}'", res.user.org_id);
        Ok(Credential::valid_for(res.token, Duration::days(API_TOKEN_TTL_DAYS)).with_user(res.user))
    }

    pub async fn list_instances(&self) -> Result<Vec<RemoteInstance>, CloudError> {
        let token = self.bearer()?;
        let url = self.config.endpoint(&["instances"])?;
        let res = self.send(self.http.get(url).bearer_auth(token)).await?;
        Ok(decode::<InstanceList>(res).await?.into_vec())
    }

    /// Tier names are the server's business; whatever it rejects comes back as `Api`.
    pub async fn create_instance(&self, tier: &str) -> Result<RemoteInstance, CloudError> {
        let token = self.bearer()?;
        let url = self.config.endpoint(&["instances"])?;
        let req = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&CreateInstanceRequest { tier });
        let instance: RemoteInstance = decode(self.send(req).await?).await?;
        require_id(instance)
    }

    pub async fn delete_instance(&self, instance_id: &str) -> Result<(), CloudError> {
        let token = self.bearer()?;
        let url = self.config.endpoint(&["instances", instance_id])?;
        self.send(self.http.delete(url).bearer_auth(token)).await?;
        Ok(())
    }

    /// Fetches the instance together with a freshly issued attach URL.
    pub async fn get_instance_with_attach_url(
        &self,
        instance_id: &str,
    ) -> Result<RemoteInstance, CloudError> {
        let token = self.bearer()?;
        let url = self.config.endpoint(&["instances", instance_id])?;
        let instance: RemoteInstance =
            decode(self.send(self.http.get(url).bearer_auth(token)).await?).await?;
        match instance.attach_url.as_deref() {
            Some(u) if !u.is_empty() => require_id(instance),
            _ => Err(CloudError::Protocol(format!(
                "no attach URL available for instance {instance_id}"
            ))),
        }
    }

    fn bearer(&self) -> Result<String, CloudError> {
        Ok(self.tokens.load()?.token)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, CloudError> {
        let res = req.send().await?;
        debug!("{} {}", res.status(), res.url());
        if res.status().is_success() {
            Ok(res)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(CloudError::Api { status, body })
        }
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, CloudError> {
    let bytes = res.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn require_id(instance: RemoteInstance) -> Result<RemoteInstance, CloudError> {
    if instance.id.is_empty() {
        return Err(CloudError::Protocol("instance without id".into()));
    }
    Ok(instance)
}
