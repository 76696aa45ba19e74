pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod interference;
pub mod link;
pub mod medium;
pub mod per_table;
pub mod scheduler;
pub mod station;
pub mod time_driver;
pub mod transport;
