//! HTTP API: generation, status polling and iterations

pub mod handlers;
pub mod routes;

pub use routes::create_router;
