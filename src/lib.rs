pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod migrate;
pub mod store;
pub mod upload;
pub mod util;
