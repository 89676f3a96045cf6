pub mod cli;
pub mod config;
pub mod server;
pub mod simulation;
pub mod sink;
pub mod weather;
