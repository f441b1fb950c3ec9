pub mod credential;
pub mod store;

pub use credential::{Account, Credential};
pub use store::{AuthError, TokenStore};
