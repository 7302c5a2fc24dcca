pub mod kline;
pub mod position;
pub mod signal;
pub mod snapshot;

pub use kline::Kline;
pub use position::{Position, Side};
pub use signal::{Direction, Signal};
pub use snapshot::IndicatorSnapshot;
