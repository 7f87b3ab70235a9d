pub mod cli;
pub mod config;
pub mod database;

pub use config::Configuration;
