pub mod config;
pub mod index;
pub mod log;
pub mod segment;
pub mod store;
