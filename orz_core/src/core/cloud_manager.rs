use log::{debug, info};
use orz_storage::{AuthError, Credential, TokenStore};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use super::attach::{self, AttachExit};
use super::tunnel_pool::{TunnelPool, TunnelSession};
use crate::api::{InstanceClient, RemoteInstance};
use crate::config::CloudConfig;
use crate::connections::websocket::WebSocketConnector;
use crate::errors::CloudError;

/// The one entry point the CLI talks to.
///
/// Owns the credential store, the REST client and the tunnel pool, and keeps
/// them consistent: deleting an instance drops its tunnel, attaching fetches
/// a fresh attach URL first. Cloning shares the same pool.
#[derive(Clone)]
pub struct CloudManager {
    api: InstanceClient,
    pool: TunnelPool,
}

impl CloudManager {
    pub fn new(config: CloudConfig) -> Result<Self, CloudError> {
        let tokens = match &config.token_path {
            Some(path) => TokenStore::at(path),
            None => TokenStore::new()?,
        };
        let connector = Arc::new(WebSocketConnector::new(config.connect_timeout));
        let pool = TunnelPool::new(connector).with_keepalive(config.keepalive_interval);
        let api = InstanceClient::new(config, tokens)?;
        Ok(Self::with_parts(api, pool))
    }

    /// Assemble from pre-built parts, e.g. a pool with a custom connector.
    pub fn with_parts(api: InstanceClient, pool: TunnelPool) -> Self {
        Self { api, pool }
    }

    pub fn config(&self) -> &CloudConfig {
        self.api.config()
    }

    pub fn tokens(&self) -> &TokenStore {
        self.api.tokens()
    }

    /// `true` when a non-expired credential is stored.
    pub fn is_authenticated(&self) -> bool {
        self.tokens().load().is_ok()
    }

    /// Persists a credential obtained at login.
    pub fn login(&self, credential: &Credential) -> Result<(), CloudError> {
        self.tokens().save(credential)?;
        info!("Credential saved to {:?}", self.tokens().path());
        Ok(())
    }

    /// Exchanges a GitHub access token at the control plane and stores the
    /// resulting API credential, account details included.
    pub async fn exchange_token(&self, github_token: &str) -> Result<Credential, CloudError> {
        let credential = self.api.exchange_token(github_token).await?;
        self.login(&credential)?;
        Ok(credential)
    }

    /// Removes the stored credential. `false` if there was none.
    pub fn logout(&self) -> Result<bool, CloudError> {
        Ok(self.tokens().clear()?)
    }

    pub fn whoami(&self) -> Result<Credential, AuthError> {
        self.tokens().load()
    }

    pub async fn list_instances(&self) -> Result<Vec<RemoteInstance>, CloudError> {
        self.api.list_instances().await
    }

    pub async fn create_instance(&self, tier: &str) -> Result<RemoteInstance, CloudError> {
        let instance = self.api.create_instance(tier).await?;
        info!("Created instance '{}' ({})", instance.id, instance.tier);
        Ok(instance)
    }

    /// Drops any local tunnel to the instance, then deletes it server-side.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<(), CloudError> {
        self.pool.close(instance_id).await;
        self.api.delete_instance(instance_id).await?;
        info!("Deleted instance '{}'", instance_id);
        Ok(())
    }

    pub async fn get_instance_with_attach_url(
        &self,
        instance_id: &str,
    ) -> Result<RemoteInstance, CloudError> {
        self.api.get_instance_with_attach_url(instance_id).await
    }

    /// Fetches a fresh attach URL and opens a tunnel with it.
    pub async fn attach(&self, instance_id: &str) -> Result<TunnelSession, CloudError> {
        let instance = self.api.get_instance_with_attach_url(instance_id).await?;
        let attach_url = instance
            .attach_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                CloudError::Protocol(format!("no attach URL available for instance {instance_id}"))
            })?;
        debug!("Attaching to '{}'", instance_id);
        self.pool.connect(instance_id, &attach_url).await
    }

    /// Opens a tunnel with an attach URL the caller already has, such as the
    /// one returned by [`create_instance`](Self::create_instance). No REST call.
    pub async fn attach_url(
        &self,
        instance_id: &str,
        attach_url: &str,
    ) -> Result<TunnelSession, CloudError> {
        self.pool.connect(instance_id, attach_url).await
    }

    pub async fn get_session(&self, instance_id: &str) -> Option<TunnelSession> {
        self.pool.get(instance_id).await
    }

    pub async fn close(&self, instance_id: &str) {
        self.pool.close(instance_id).await
    }

    pub async fn close_all(&self) {
        self.pool.close_all().await
    }

    /// Runs the attach pump and closes the session when it returns, whatever
    /// the outcome.
    pub async fn run_attached<R, W, F>(
        &self,
        session: TunnelSession,
        input: R,
        output: W,
        cancel: F,
    ) -> Result<AttachExit, CloudError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let exit = attach::pump(&session, input, output, cancel).await;
        self.pool.close_session(&session).await;
        match &exit {
            Ok(reason) => info!("Left '{}': {:?}", session.instance_id(), reason),
            Err(e) => info!("Attach to '{}' failed: {}", session.instance_id(), e),
        }
        exit
    }
}
