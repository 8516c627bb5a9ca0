pub mod auth;
pub mod handlers;
pub mod health;
pub mod qr;
pub mod server;
pub mod shutdown;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use shutdown::ShutdownCoordinator;
