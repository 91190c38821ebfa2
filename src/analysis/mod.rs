//! 真伪评分：提示词构造、上游调度、结果校验与兜底报告。

pub mod dispatcher;
pub mod fallback;
pub mod parse;
pub mod prompt;
pub mod types;

pub use dispatcher::{Dispatcher, Upstream};
pub use fallback::fallback;
pub use types::{AnalysisOutcome, ConfidenceLevel, Factor, Indicator, IndicatorStatus, MediaKind, ScoreReport};
