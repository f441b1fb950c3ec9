pub mod websocket_connection;

pub use websocket_connection::{WebSocketConnection, WebSocketConnector};
