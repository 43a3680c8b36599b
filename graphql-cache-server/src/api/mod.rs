//! HTTP boundary of the GraphQL cache

pub mod auth;
pub mod middleware;
pub mod routes;
pub mod server;

pub use auth::JwtAuth;
pub use middleware::{AuthState, Identity};
pub use server::{router, ApiServer, ApiServerConfig};
