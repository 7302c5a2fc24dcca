use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

/// Outcome of classifying one indicator snapshot. `strength` counts the
/// corroborating conditions behind the call; `Hold` is always strength 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub direction: Direction,
    pub strength: u32,
}

impl Signal {
    pub const HOLD: Signal = Signal {
        direction: Direction::Hold,
        strength: 0,
    };

    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::Hold
    }
}
