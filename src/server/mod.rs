pub mod bootstrap;
mod dto;
mod error;
pub mod logging;
pub mod routes;
mod sse;

pub use bootstrap::{run_server, ServerConfig};
pub use error::ApiError;
pub use routes::{router, ServerContext};
