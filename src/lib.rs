pub mod agent;
pub mod aggregate;
pub mod config;
pub mod emit;
pub mod health;
pub mod metric;
pub mod poller;
pub mod source;
