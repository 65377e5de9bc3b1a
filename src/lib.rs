// src/lib.rs
pub mod announce;
pub mod config;
pub mod server;
pub mod topology;
