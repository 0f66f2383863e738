//! Strategies expressed as composition diagrams

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EmulationSettings;
use crate::emulation::{EmulationError, Portfolio, Security};
use crate::graph::CompositionDiagramElement;

/// Lifecycle state of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Stopped,
    Started,
    Stopping,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "Stopped"),
            ProcessState::Started => write!(f, "Started"),
            ProcessState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// What a run attaches to a strategy before starting it
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyBinding {
    pub security: Security,
    pub portfolio: Portfolio,

    /// Default order volume
    pub volume: u32,

    /// How often unrealized PnL is recomputed
    pub unrealized_pnl_interval: Duration,

    pub debug_log: bool,
}

/// A trading strategy whose logic is a composition diagram.
///
/// The strategy owns the execution engine; the orchestrator only drives its
/// lifecycle.
pub trait DiagramStrategy: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Root composition the strategy evaluates
    fn composition(&self) -> Arc<CompositionDiagramElement>;

    /// Backtest parameters carried by the strategy
    fn emulation_settings(&self) -> EmulationSettings;

    fn process_state(&self) -> ProcessState;

    /// Clear positions, statistics and evaluation state
    fn reset(&self);

    /// Attach the run's security and portfolio
    fn bind(&self, binding: StrategyBinding);

    fn start(&self) -> Result<(), EmulationError>;

    fn stop(&self);
}
