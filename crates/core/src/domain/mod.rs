pub mod scan;
pub mod score;
pub mod snapshot;
