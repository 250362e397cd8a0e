pub mod cache;
pub mod fake;
pub mod provider;
pub mod ticker;
pub mod types;
