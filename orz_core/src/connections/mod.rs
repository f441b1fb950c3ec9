pub mod connection;
pub mod endpoint;
pub mod errors;
pub mod websocket;

// Re-export the modules here for easy import elsewhere.
pub use connection::*;
pub use endpoint::*;
pub use errors::*;
