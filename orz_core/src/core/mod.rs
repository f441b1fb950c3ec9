pub mod attach;
pub mod cloud_manager;
pub mod tunnel_pool;
