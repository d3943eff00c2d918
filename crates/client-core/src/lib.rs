pub mod chat;
pub mod config;
mod config_env;
pub mod credentials;
pub mod models;
pub mod scan;
