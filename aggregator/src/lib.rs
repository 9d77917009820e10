pub mod api;
pub mod config;
pub mod handlers;
pub mod pipeline;
pub mod router;
pub mod server;
