pub mod api;
pub mod config;
pub mod connections;
pub mod core;
pub mod errors;
pub mod utils;

// re‑export ergonomic entry points
pub use api::{InstanceClient, InstanceStatus, RemoteInstance};
pub use config::CloudConfig;
pub use self::core::attach::AttachExit;
pub use self::core::cloud_manager::CloudManager;
pub use self::core::tunnel_pool::{TunnelPool, TunnelSession};
pub use errors::CloudError;
pub use orz_storage::{Account, AuthError, Credential, TokenStore};
