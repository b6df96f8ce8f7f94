pub mod server;
pub mod service;

pub use server::{serve, serve_connection, serve_with_shutdown, shutdown_signal, ServeConfig};
pub use service::DriverService;
