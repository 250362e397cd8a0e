pub mod market_clock;

pub use market_clock::resolve_as_of_date;
