pub mod complex;
pub mod interest;
pub mod stats;

pub use complex::ComplexFieldDecoder;
pub use interest::InterestMap;
pub use stats::StatsHelper;
