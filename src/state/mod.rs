pub mod auth;
pub mod controller;
pub mod data_loader;
pub mod snapshot;
