pub mod classifier;
pub mod indicators;
pub mod sizing;

pub use classifier::classify;
pub use indicators::SnapshotBuilder;
pub use sizing::order_notional;
