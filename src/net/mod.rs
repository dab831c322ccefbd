pub mod api;
pub mod auth_api;
pub mod http;
pub mod server_auth;
pub mod types;
