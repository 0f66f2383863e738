//! Persisted settings: debugger snapshots, emulation parameters and the
//! key/value document they are stored in

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::graph::SocketId;

/// Key the debugger snapshot is stored under
pub const DEBUGGER_SETTINGS_KEY: &str = "DebuggerSettings";

/// Key the emulation parameters are stored under
pub const EMULATION_SETTINGS_KEY: &str = "EmulationSettings";

/// Errors from reading or writing settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The document on disk is valid JSON but not an object
    #[error("Settings document must be a JSON object")]
    NotAnObject,

    #[error("No settings file configured")]
    NoPath,
}

/// Snapshot of a debugger: enablement and breakpoint sockets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebuggerSettings {
    pub is_enabled: bool,

    #[serde(default)]
    pub breakpoints: Vec<SocketId>,
}

/// Where historical market data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketDataSource {
    #[default]
    Ticks,
    Candles,
}

/// On-disk format of historical data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
    #[default]
    Binary,
    Csv,
}

/// Location of the historical data store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataSettings {
    pub path: PathBuf,

    #[serde(default)]
    pub storage_format: StorageFormat,
}

/// Parameters of one backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulationSettings {
    /// Required to start; `None` until the user picks a data store
    pub market_data: Option<MarketDataSettings>,

    pub source: MarketDataSource,

    /// Candle period, also the market-time notification interval
    pub candle_time_frame_secs: u64,

    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,

    /// Fill limit orders when the price touches them rather than crosses
    pub match_on_touch: bool,

    pub atomic_reregister: bool,

    /// Simulated order latency
    pub latency_ms: u64,

    pub use_market_depths: bool,

    /// Synthesize order books from trades when none are stored
    pub generate_depths: bool,

    pub max_depths: u32,
    pub max_volume: u32,

    /// Debug level logging for the run
    pub debug_log: bool,

    pub commission_per_trade: f64,
}

impl Default for EmulationSettings {
    fn default() -> Self {
        let stop = Utc::now();
        Self {
            market_data: None,
            source: MarketDataSource::Ticks,
            candle_time_frame_secs: 60,
            start: stop - ChronoDuration::days(30),
            stop,
            match_on_touch: false,
            atomic_reregister: true,
            latency_ms: 0,
            use_market_depths: false,
            generate_depths: false,
            max_depths: 5,
            max_volume: 100,
            debug_log: false,
            commission_per_trade: 0.01,
        }
    }
}

impl EmulationSettings {
    /// Candle period as a duration
    pub fn candle_time_frame(&self) -> Duration {
        Duration::from_secs(self.candle_time_frame_secs)
    }

    /// Simulated latency as a duration
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Top-level designer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignerConfig {
    /// Settings document location; `None` keeps settings in memory only
    pub settings_path: Option<PathBuf>,

    /// Delay between a settings change and the background write
    pub flush_interval_ms: u64,

    /// Capacity of the emulation event channel
    pub event_capacity: usize,
}

impl Default for DesignerConfig {
    fn default() -> Self {
        Self {
            settings_path: None,
            flush_interval_ms: 500,
            event_capacity: 256,
        }
    }
}

impl DesignerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Key/value settings document with explicit and debounced persistence
#[derive(Debug, Default)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    document: RwLock<Map<String, Value>>,
    dirty: AtomicBool,
    changed: Notify,
}

impl SettingsStore {
    /// In-memory store that never touches disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store persisted at `path`; nothing is read until `load`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Store for a designer configuration: file-backed when a settings path
    /// is configured, in memory otherwise
    pub fn from_config(config: &DesignerConfig) -> Self {
        match &config.settings_path {
            Some(path) => Self::with_path(path),
            None => Self::in_memory(),
        }
    }

    /// File the store persists to
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read a typed value. Missing keys yield `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let document = self.document.read();
        match document.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Write a typed value and mark the document dirty
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let value = serde_json::to_value(value)?;
        self.document.write().insert(key.to_string(), value);
        self.mark_dirty();
        Ok(())
    }

    /// Remove a key. Returns true if it existed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.document.write().remove(key).is_some();
        if removed {
            self.mark_dirty();
        }
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.document.read().contains_key(key)
    }

    /// Unsaved changes pending
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the document to its file
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = self.path.as_ref().ok_or(SettingsError::NoPath)?;

        // clear first so a change racing the write marks dirty again
        self.dirty.store(false, Ordering::Release);
        let json = {
            let document = self.document.read();
            serde_json::to_string_pretty(&*document)?
        };

        if let Err(err) = std::fs::write(path, json) {
            self.dirty.store(true, Ordering::Release);
            return Err(err.into());
        }

        debug!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Replace the document with the file contents. A missing file leaves an
    /// empty document.
    pub fn load(&self) -> Result<(), SettingsError> {
        let path = self.path.as_ref().ok_or(SettingsError::NoPath)?;

        let document = match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Value>(&json)? {
                Value::Object(map) => map,
                _ => return Err(SettingsError::NotAnObject),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };

        *self.document.write() = document;
        self.dirty.store(false, Ordering::Release);
        debug!(path = %path.display(), "Settings loaded");
        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.changed.notify_one();
    }

    /// Spawn a task that saves the document `interval` after changes settle.
    ///
    /// Must be called inside a tokio runtime. Pending changes are flushed when
    /// the returned handle is shut down.
    pub fn spawn_debounced_flush(self: &Arc<Self>, interval: Duration) -> FlushHandle {
        let shutdown = Arc::new(Notify::new());
        let store = self.clone();
        let stop = shutdown.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = store.changed.notified() => {}
                    _ = stop.notified() => break,
                }

                // restart the delay for every change that arrives meanwhile
                loop {
                    tokio::select! {
                        _ = store.changed.notified() => continue,
                        _ = tokio::time::sleep(interval) => break,
                        _ = stop.notified() => {
                            store.flush_if_dirty();
                            return;
                        }
                    }
                }

                store.flush_if_dirty();
            }
            store.flush_if_dirty();
        });

        FlushHandle { shutdown, task }
    }

    fn flush_if_dirty(&self) {
        if !self.is_dirty() {
            return;
        }
        if let Err(err) = self.save() {
            warn!(%err, "Background settings flush failed");
        }
    }
}

/// Controls a background flush task
#[derive(Debug)]
pub struct FlushHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl FlushHandle {
    /// Flush pending changes and stop the task
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.task.await {
            warn!(%err, "Settings flush task ended abnormally");
        }
    }
}
