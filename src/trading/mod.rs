//! Trading logic: change detection, sizing, safety governor and the engine.

mod config;
mod copy_engine;
mod detector;
mod executor;
mod governor;
mod position_sizer;

pub use config::{MirrorConfig, SizingMode, WatchedAccount};
pub use copy_engine::{CopyEngine, EngineMessage};
pub use detector::{ChangeDetector, Detection};
pub use executor::{ExecutionOutcome, TradeExecutor};
pub use governor::{PauseState, SafetyGovernor, Transition};
pub use position_sizer::PositionSizer;
