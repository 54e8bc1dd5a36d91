pub mod config;
pub mod epochs;
pub mod pipeline;
