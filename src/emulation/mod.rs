//! Backtest orchestration
//!
//! An [`EmulationOrchestrator`] turns a strategy's emulation settings into a
//! history connector run, starts the strategy once the connector has looked
//! up its security, reports playback progress and tears everything down on
//! stop. The connector itself is an injected collaborator.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{EmulationSettings, MarketDataSettings, MarketDataSource, StorageFormat};

pub mod orchestrator;
pub mod progress;

pub use orchestrator::EmulationOrchestrator;
pub use progress::ProgressTracker;

/// Id of the instrument every backtest trades; the data folder has the same name
pub const SYNTHETIC_SECURITY_ID: &str = "empty@empty";

/// Name of the portfolio every backtest trades from
pub const TEST_PORTFOLIO: &str = "test account";

/// Starting capital of the test portfolio
pub const TEST_PORTFOLIO_BEGIN_VALUE: f64 = 1_000_000.0;

/// Errors from emulation runs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// Missing or inconsistent setup; the run was not started
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connector error: {0}")]
    Connector(String),

    #[error("Strategy error: {0}")]
    Strategy(String),
}

/// Run state as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmulationState {
    #[default]
    Stopped,
    Started,
}

impl fmt::Display for EmulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationState::Stopped => write!(f, "Stopped"),
            EmulationState::Started => write!(f, "Started"),
        }
    }
}

/// Instrument traded by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub id: String,
    pub code: String,
    pub board: String,
}

impl Security {
    /// Parse a `code@board` security id
    pub fn parse(id: &str) -> Result<Self, EmulationError> {
        match id.split_once('@') {
            Some((code, board)) if !code.is_empty() && !board.is_empty() && !board.contains('@') => {
                Ok(Self {
                    id: id.to_string(),
                    code: code.to_string(),
                    board: board.to_string(),
                })
            }
            _ => Err(EmulationError::Configuration(format!(
                "malformed security id '{id}'"
            ))),
        }
    }

    /// The placeholder instrument backtests run against
    pub fn synthetic() -> Self {
        Self {
            id: SYNTHETIC_SECURITY_ID.to_string(),
            code: "empty".to_string(),
            board: "empty".to_string(),
        }
    }
}

/// Account a run trades from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub name: String,
    pub begin_value: f64,
}

impl Portfolio {
    /// The portfolio every backtest uses
    pub fn test_account() -> Self {
        Self {
            name: TEST_PORTFOLIO.to_string(),
            begin_value: TEST_PORTFOLIO_BEGIN_VALUE,
        }
    }
}

/// Synthetic order book generation when no depth history is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthGeneration {
    pub interval: Duration,
    pub max_depth: u32,
    pub max_volume: u32,
    pub min_spread_steps: u32,
    pub max_spread_steps: u32,
    pub max_price_steps: u32,
}

/// Everything a connector needs to replay history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRunConfig {
    pub security: Security,
    pub portfolio: Portfolio,
    pub data_path: PathBuf,
    pub storage_format: StorageFormat,
    pub source: MarketDataSource,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,

    /// Market-time notification interval, the candle time frame
    pub market_time_interval: Duration,

    pub match_on_touch: bool,
    pub atomic_reregister: bool,
    pub latency: Duration,

    /// Subscribe to order books
    pub use_market_depths: bool,

    /// Set when order books are to be synthesized
    pub depth_generation: Option<DepthGeneration>,

    pub debug_log: bool,
}

impl HistoryRunConfig {
    /// Build a run configuration for the synthetic security and test portfolio
    pub fn from_settings(settings: &EmulationSettings, market_data: &MarketDataSettings) -> Self {
        let candles = settings.source == MarketDataSource::Candles;

        // stored depths are used unless generation is asked for; candles carry none
        let depth_generation = (settings.use_market_depths && (settings.generate_depths || candles))
            .then(|| DepthGeneration {
                interval: Duration::from_secs(1),
                max_depth: settings.max_depths,
                max_volume: settings.max_volume,
                min_spread_steps: 2,
                max_spread_steps: 5,
                max_price_steps: 3,
            });

        Self {
            security: Security::synthetic(),
            portfolio: Portfolio::test_account(),
            data_path: market_data.path.clone(),
            storage_format: market_data.storage_format,
            source: settings.source,
            start: settings.start,
            stop: settings.stop,
            market_time_interval: settings.candle_time_frame(),
            match_on_touch: settings.match_on_touch,
            atomic_reregister: settings.atomic_reregister,
            latency: settings.latency(),
            use_market_depths: settings.use_market_depths,
            depth_generation,
            debug_log: settings.debug_log,
        }
    }
}

/// Lifecycle state of a history connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

/// Commission charged by the simulated exchange
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionRule {
    /// Fixed amount per executed trade
    PerTrade(f64),
}

/// Notifications raised by a history connector
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    Connected,

    /// Securities are known; playback may start
    SecurityLookupCompleted,

    /// The simulated clock advanced
    MarketTimeChanged(DateTime<Utc>),

    StateChanged(ConnectorState),

    Disconnected,

    Error(String),
}

/// Replays historical market data
#[async_trait]
pub trait HistoryConnector: Send + Sync {
    /// Connect and begin the security lookup
    async fn connect(&self) -> Result<(), EmulationError>;

    /// Start playback
    async fn start(&self) -> Result<(), EmulationError>;

    async fn disconnect(&self) -> Result<(), EmulationError>;

    fn state(&self) -> ConnectorState;

    /// Playback reached the end of the range
    fn is_finished(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent>;

    async fn send_commission_rule(&self, rule: CommissionRule) -> Result<(), EmulationError>;
}

/// Creates a connector per run
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, config: HistoryRunConfig) -> Result<Arc<dyn HistoryConnector>, EmulationError>;
}

/// Notifications for the UI side
#[derive(Debug, Clone, PartialEq)]
pub enum EmulationEvent {
    /// Playback progress, 0 to 100
    Progress(u8),

    StateChanged(EmulationState),

    /// User-visible error message
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_security_matches_its_id() {
        assert_eq!(Security::parse(SYNTHETIC_SECURITY_ID).unwrap(), Security::synthetic());
    }

    #[test]
    fn test_malformed_security_ids() {
        for id in ["", "empty", "@board", "code@", "a@b@c"] {
            assert!(matches!(Security::parse(id), Err(EmulationError::Configuration(_))), "{id}");
        }
    }

    #[test]
    fn test_depth_generation_for_candles() {
        let market_data = MarketDataSettings {
            path: PathBuf::from("history"),
            storage_format: StorageFormat::Binary,
        };
        let mut settings = EmulationSettings {
            source: MarketDataSource::Candles,
            use_market_depths: true,
            ..EmulationSettings::default()
        };

        let config = HistoryRunConfig::from_settings(&settings, &market_data);
        assert_eq!(config.depth_generation.map(|d| d.max_depth), Some(settings.max_depths));
        assert_eq!(config.portfolio.begin_value, TEST_PORTFOLIO_BEGIN_VALUE);

        settings.source = MarketDataSource::Ticks;
        assert!(HistoryRunConfig::from_settings(&settings, &market_data)
            .depth_generation
            .is_none());
    }
}
