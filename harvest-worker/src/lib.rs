pub mod app_context;
pub mod config;
pub mod error;
pub mod handlers;
pub mod parser;
