//! Strategy signal generation
//!
//! Indicator math, per-cohort parameter sets, and the evaluator that turns
//! price events for the actively monitored token into BUY/SELL/HOLD signals.

pub mod evaluator;
pub mod indicators;
pub mod params;

pub use evaluator::{Signal, SignalAction, StrategyEvaluator, TokenState};
pub use params::{StrategyKind, StrategyThresholds};
