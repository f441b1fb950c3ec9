pub mod fake_connection;
