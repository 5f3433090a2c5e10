pub mod config;
pub mod rwlatch;
pub mod types;
