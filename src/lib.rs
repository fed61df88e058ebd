pub mod config;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod pid;
pub mod providers;
pub mod router;
pub mod server;
