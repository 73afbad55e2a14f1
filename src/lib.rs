pub mod address;
pub mod api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod icon;
pub mod lookup;
pub mod models;
pub mod monitor;
pub mod motd;
pub mod notify;
pub mod probe;
pub mod scheduler;
