//! Scripted connector and strategy shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use diagram_debugger::{
    config::{EmulationSettings, MarketDataSettings, StorageFormat},
    emulation::{
        CommissionRule, ConnectorEvent, ConnectorFactory, ConnectorState, EmulationError,
        HistoryConnector, HistoryRunConfig,
    },
    graph::{CompositionBuilder, CompositionDiagramElement, DiagramElement},
    strategy::{DiagramStrategy, ProcessState, StrategyBinding},
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Ordered record of lifecycle calls across connector and strategy
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub fn range() -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (start, start + ChronoDuration::hours(100))
}

pub fn settings_with_market_data() -> EmulationSettings {
    let (start, stop) = range();
    EmulationSettings {
        market_data: Some(MarketDataSettings {
            path: PathBuf::from("history"),
            storage_format: StorageFormat::Binary,
        }),
        start,
        stop,
        ..EmulationSettings::default()
    }
}

pub fn simple_composition() -> CompositionDiagramElement {
    let element = DiagramElement::new("Sma", Uuid::new_v4())
        .with_input("Price")
        .with_output("Value");
    CompositionBuilder::new("strategy").add_element(element).build().unwrap()
}

pub struct MockStrategy {
    composition: Arc<CompositionDiagramElement>,
    settings: EmulationSettings,
    state: Mutex<ProcessState>,
    pub binding: Mutex<Option<StrategyBinding>>,
    pub resets: AtomicUsize,
    log: CallLog,
}

impl MockStrategy {
    pub fn new(composition: CompositionDiagramElement, settings: EmulationSettings, log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            composition: Arc::new(composition),
            settings,
            state: Mutex::new(ProcessState::Stopped),
            binding: Mutex::new(None),
            resets: AtomicUsize::new(0),
            log,
        })
    }
}

impl DiagramStrategy for MockStrategy {
    fn name(&self) -> &str {
        "mock"
    }

    fn composition(&self) -> Arc<CompositionDiagramElement> {
        self.composition.clone()
    }

    fn emulation_settings(&self) -> EmulationSettings {
        self.settings.clone()
    }

    fn process_state(&self) -> ProcessState {
        *self.state.lock()
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn bind(&self, binding: StrategyBinding) {
        *self.binding.lock() = Some(binding);
    }

    fn start(&self) -> Result<(), EmulationError> {
        self.log.lock().push("strategy.start");
        *self.state.lock() = ProcessState::Started;
        Ok(())
    }

    fn stop(&self) {
        self.log.lock().push("strategy.stop");
        *self.state.lock() = ProcessState::Stopped;
    }
}

/// Connector whose playback is driven by the test
pub struct MockConnector {
    state: Mutex<ConnectorState>,
    finished: AtomicBool,
    fail_connect: bool,
    events: broadcast::Sender<ConnectorEvent>,
    pub commission: Mutex<Option<CommissionRule>>,
    pub disconnects: AtomicUsize,
    log: CallLog,
}

impl MockConnector {
    /// Replay market time notifications
    pub fn play(&self, times: impl IntoIterator<Item = DateTime<Utc>>) {
        for time in times {
            let _ = self.events.send(ConnectorEvent::MarketTimeChanged(time));
        }
    }

    /// End of history reached
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        *self.state.lock() = ConnectorState::Stopped;
        let _ = self.events.send(ConnectorEvent::StateChanged(ConnectorState::Stopped));
    }
}

#[async_trait]
impl HistoryConnector for MockConnector {
    async fn connect(&self) -> Result<(), EmulationError> {
        self.log.lock().push("connector.connect");
        if self.fail_connect {
            return Err(EmulationError::Connector("history store unavailable".to_string()));
        }
        let _ = self.events.send(ConnectorEvent::Connected);
        let _ = self.events.send(ConnectorEvent::SecurityLookupCompleted);
        Ok(())
    }

    async fn start(&self) -> Result<(), EmulationError> {
        self.log.lock().push("connector.start");
        *self.state.lock() = ConnectorState::Started;
        let _ = self.events.send(ConnectorEvent::StateChanged(ConnectorState::Started));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EmulationError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ConnectorState::Stopped;
        let _ = self.events.send(ConnectorEvent::Disconnected);
        Ok(())
    }

    fn state(&self) -> ConnectorState {
        *self.state.lock()
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }

    async fn send_commission_rule(&self, rule: CommissionRule) -> Result<(), EmulationError> {
        *self.commission.lock() = Some(rule);
        Ok(())
    }
}

/// Factory that keeps the connectors it created for inspection
#[derive(Default)]
pub struct MockFactory {
    pub fail_connect: bool,
    pub created: Mutex<Vec<Arc<MockConnector>>>,
    pub configs: Mutex<Vec<HistoryRunConfig>>,
    pub log: CallLog,
}

impl MockFactory {
    pub fn last(&self) -> Arc<MockConnector> {
        self.created.lock().last().cloned().expect("no connector created")
    }
}

impl ConnectorFactory for MockFactory {
    fn create(&self, config: HistoryRunConfig) -> Result<Arc<dyn HistoryConnector>, EmulationError> {
        let (events, _) = broadcast::channel(1024);
        let connector = Arc::new(MockConnector {
            state: Mutex::new(ConnectorState::Stopped),
            finished: AtomicBool::new(false),
            fail_connect: self.fail_connect,
            events,
            commission: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
            log: self.log.clone(),
        });
        self.configs.lock().push(config);
        self.created.lock().push(connector.clone());
        Ok(connector)
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
