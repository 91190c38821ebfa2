//! 凭证可用性跟踪：失败计数 + 冷却窗口。
//!
//! 状态只在进程内存中，重启即清空。

pub mod clock;
pub mod tracker;

pub use clock::{Clock, SystemClock};
pub use tracker::{AvailabilityTracker, FailureSnapshot, TrackerConfig};
