//! Drives one strategy through a history connector run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::bus::{CommandBus, CommandKind, ScopeToken, StudioCommand};
use crate::config::{DesignerConfig, SettingsStore, EMULATION_SETTINGS_KEY};
use crate::emulation::{
    CommissionRule, ConnectorEvent, ConnectorFactory, ConnectorState, EmulationError,
    EmulationEvent, EmulationState, HistoryConnector, HistoryRunConfig, ProgressTracker, Security,
};
use crate::graph::ParameterKind;
use crate::strategy::{DiagramStrategy, ProcessState, StrategyBinding};

/// Capacity of the emulation event channel
const EVENT_CAPACITY: usize = 256;

/// Unrealized PnL is recomputed this many times over the range
const PNL_UPDATES: i32 = 1000;

struct ActiveRun {
    id: Uuid,
    connector: Arc<dyn HistoryConnector>,
    strategy: Arc<dyn DiagramStrategy>,
    task: JoinHandle<()>,

    /// Playback stopped on its own
    ended: Arc<AtomicBool>,
}

/// Slot holding the current run, shared with its event task
type RunSlot = Arc<Mutex<Option<ActiveRun>>>;

/// Starts and stops backtests of the bound strategy.
///
/// The debugger is driven through the command bus in the orchestrator's
/// scope, so whichever session owns that scope follows the run.
pub struct EmulationOrchestrator {
    factory: Arc<dyn ConnectorFactory>,
    bus: Arc<CommandBus>,
    scope: ScopeToken,
    strategy: RwLock<Option<Arc<dyn DiagramStrategy>>>,
    run: RunSlot,
    events: broadcast::Sender<EmulationEvent>,
    progress: Arc<watch::Sender<u8>>,

    /// Receives the settings of every started run
    store: Option<Arc<SettingsStore>>,
}

impl EmulationOrchestrator {
    /// Create an orchestrator issuing debugger commands in `scope`
    pub fn new(factory: Arc<dyn ConnectorFactory>, bus: Arc<CommandBus>, scope: ScopeToken) -> Self {
        Self::with_capacity(factory, bus, scope, EVENT_CAPACITY)
    }

    /// Same as `new` with an explicit event channel capacity
    pub fn with_capacity(
        factory: Arc<dyn ConnectorFactory>,
        bus: Arc<CommandBus>,
        scope: ScopeToken,
        capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (progress, _) = watch::channel(0);

        Self {
            factory,
            bus,
            scope,
            strategy: RwLock::new(None),
            run: Arc::new(Mutex::new(None)),
            events,
            progress: Arc::new(progress),
            store: None,
        }
    }

    /// Orchestrator sized and persisted according to a designer configuration
    pub fn from_config(
        factory: Arc<dyn ConnectorFactory>,
        bus: Arc<CommandBus>,
        scope: ScopeToken,
        config: &DesignerConfig,
        store: Option<Arc<SettingsStore>>,
    ) -> Self {
        let mut orchestrator = Self::with_capacity(factory, bus, scope, config.event_capacity);
        orchestrator.store = store;
        orchestrator
    }

    /// Scope the orchestrator issues commands in
    pub fn scope(&self) -> ScopeToken {
        self.scope
    }

    /// Select the strategy for the next run
    pub fn set_strategy(&self, strategy: Option<Arc<dyn DiagramStrategy>>) {
        *self.strategy.write() = strategy;
    }

    pub fn strategy(&self) -> Option<Arc<dyn DiagramStrategy>> {
        self.strategy.read().clone()
    }

    /// Started from a successful `start` until `stop` or the end of playback
    pub fn state(&self) -> EmulationState {
        match self.run.lock().as_ref() {
            Some(run) if !run.ended.load(Ordering::Acquire) => EmulationState::Started,
            _ => EmulationState::Stopped,
        }
    }

    /// Subscribe to progress, state and error notifications
    pub fn subscribe(&self) -> broadcast::Receiver<EmulationEvent> {
        self.events.subscribe()
    }

    /// Watch the latest progress value
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    /// Start a backtest of the bound strategy.
    ///
    /// Calling this while a run is active fails without touching that run.
    /// Any other failure stops whatever was set up, publishes the error and
    /// returns it.
    #[instrument(skip(self), fields(scope = %self.scope))]
    pub async fn start(&self) -> Result<(), EmulationError> {
        if self.state() == EmulationState::Started {
            return Err(EmulationError::Configuration(
                "emulation already started".to_string(),
            ));
        }

        // a run whose playback ended still holds its connector
        let finished = self.run.lock().take();
        if let Some(run) = finished {
            run.task.abort();
            if let Err(err) = run.connector.disconnect().await {
                warn!(%err, "Disconnect of finished run failed");
            }
        }

        match self.try_start().await {
            Ok(()) => {
                info!("Emulation started");
                Ok(())
            }
            Err(err) => {
                self.stop().await;
                error!(%err, "Emulation failed to start");
                publish(&self.events, EmulationEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    async fn try_start(&self) -> Result<(), EmulationError> {
        let strategy = self
            .strategy()
            .ok_or_else(|| EmulationError::Configuration("strategy not selected".to_string()))?;

        let settings = strategy.emulation_settings();
        let market_data = settings.market_data.clone().ok_or_else(|| {
            EmulationError::Configuration("market data settings not selected".to_string())
        })?;

        let composition = strategy.composition();
        for parameter in composition
            .parameters()
            .iter()
            .filter(|p| p.kind == ParameterKind::Security)
        {
            match parameter.value.as_ref().and_then(|v| v.as_str()) {
                Some(id) => {
                    Security::parse(id).map_err(|err| {
                        EmulationError::Configuration(format!(
                            "security parameter '{}': {err}",
                            parameter.name
                        ))
                    })?;
                }
                None => {
                    return Err(EmulationError::Configuration(format!(
                        "security parameter '{}' has no value",
                        parameter.name
                    )))
                }
            }
        }

        if settings.stop <= settings.start {
            return Err(EmulationError::Configuration(format!(
                "empty history range {} - {}",
                settings.start, settings.stop
            )));
        }

        if let Some(store) = &self.store {
            if let Err(err) = store.set(EMULATION_SETTINGS_KEY, &settings) {
                warn!(%err, "Emulation settings not persisted");
            }
        }

        strategy.reset();
        self.send_to_debugger(StudioCommand::Reset);
        self.progress.send_replace(0);

        let config = HistoryRunConfig::from_settings(&settings, &market_data);
        let range = settings.stop - settings.start;
        let binding = StrategyBinding {
            security: config.security.clone(),
            portfolio: config.portfolio.clone(),
            volume: 1,
            unrealized_pnl_interval: (range / PNL_UPDATES).to_std().unwrap_or(Duration::from_secs(60)),
            debug_log: settings.debug_log,
        };

        debug!(?config, "Creating history connector");
        let connector = self.factory.create(config)?;
        strategy.bind(binding);

        let id = Uuid::new_v4();
        let ended = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(handle_connector_events(
            id,
            ended.clone(),
            connector.subscribe(),
            connector.clone(),
            strategy.clone(),
            ProgressTracker::new(settings.start, settings.stop),
            self.events.clone(),
            self.progress.clone(),
            self.run.clone(),
        ));

        *self.run.lock() = Some(ActiveRun {
            id,
            connector: connector.clone(),
            strategy,
            task,
            ended,
        });

        self.send_to_debugger(StudioCommand::DebuggerState(true));

        connector.connect().await?;
        connector
            .send_commission_rule(CommissionRule::PerTrade(settings.commission_per_trade))
            .await?;

        publish(&self.events, EmulationEvent::StateChanged(EmulationState::Started));
        Ok(())
    }

    /// Stop the run, disable the debugger and release any suspension.
    /// Safe to call at any time, any number of times.
    #[instrument(skip(self), fields(scope = %self.scope))]
    pub async fn stop(&self) {
        let run = self.run.lock().take();

        if let Some(run) = run {
            run.task.abort();

            if let Err(err) = run.connector.disconnect().await {
                warn!(%err, "Disconnect failed");
            }
            if run.strategy.process_state() != ProcessState::Stopped {
                run.strategy.stop();
            }

            publish(&self.events, EmulationEvent::StateChanged(EmulationState::Stopped));
            info!(run = %run.id, "Emulation stopped");
        }

        self.send_to_debugger(StudioCommand::DebuggerState(false));
        if self.bus.can_process(self.scope, &StudioCommand::Continue) {
            self.send_to_debugger(StudioCommand::Continue);
        }
    }

    fn send_to_debugger(&self, command: StudioCommand) {
        if let Err(err) = self.bus.process(self.scope, &command) {
            warn!(?command, %err, "Debugger command failed");
        }
    }

    /// Handle start and stop commands sent to the orchestrator's scope.
    ///
    /// Handlers spawn onto the current tokio runtime; errors surface as
    /// [`EmulationEvent::Error`].
    pub fn register_commands(self: &Arc<Self>) {
        let start = Arc::downgrade(self);
        let can_start = Arc::downgrade(self);
        self.bus.register_guarded(
            CommandKind::StartEmulation,
            self.scope,
            move |_| {
                if let Some(orchestrator) = start.upgrade() {
                    spawn_on_runtime(async move {
                        // failure is already published
                        let _ = orchestrator.start().await;
                    })?;
                }
                Ok(())
            },
            move |_| {
                can_start.upgrade().is_some_and(|o| {
                    o.state() == EmulationState::Stopped && o.strategy.read().is_some()
                })
            },
        );

        let stop = Arc::downgrade(self);
        let can_stop = Arc::downgrade(self);
        self.bus.register_guarded(
            CommandKind::StopEmulation,
            self.scope,
            move |_| {
                if let Some(orchestrator) = stop.upgrade() {
                    spawn_on_runtime(async move { orchestrator.stop().await })?;
                }
                Ok(())
            },
            move |_| {
                can_stop
                    .upgrade()
                    .is_some_and(|o| o.state() == EmulationState::Started)
            },
        );
    }
}

impl std::fmt::Debug for EmulationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulationOrchestrator")
            .field("scope", &self.scope)
            .field("state", &self.state())
            .field("strategy", &self.strategy.read().as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

fn spawn_on_runtime<F>(future: F) -> crate::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|err| crate::DesignerError::Internal(err.to_string()))?;
    handle.spawn(future);
    Ok(())
}

fn publish(events: &broadcast::Sender<EmulationEvent>, event: EmulationEvent) {
    // no subscribers is fine
    let _ = events.send(event);
}

fn report_progress(
    events: &broadcast::Sender<EmulationEvent>,
    progress: &watch::Sender<u8>,
    value: u8,
) {
    progress.send_replace(value);
    publish(events, EmulationEvent::Progress(value));
}

#[allow(clippy::too_many_arguments)]
async fn handle_connector_events(
    id: Uuid,
    ended: Arc<AtomicBool>,
    mut receiver: broadcast::Receiver<ConnectorEvent>,
    connector: Arc<dyn HistoryConnector>,
    strategy: Arc<dyn DiagramStrategy>,
    mut tracker: ProgressTracker,
    events: broadcast::Sender<EmulationEvent>,
    progress: Arc<watch::Sender<u8>>,
    run: RunSlot,
) {
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Connector events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ConnectorEvent::Connected => debug!("Connector connected"),
            ConnectorEvent::SecurityLookupCompleted => {
                if strategy.process_state() != ProcessState::Stopped {
                    continue;
                }

                // the strategy must see the first market data
                if let Err(err) = strategy.start() {
                    error!(%err, "Strategy failed to start");
                    publish(&events, EmulationEvent::Error(err.to_string()));
                    continue;
                }
                if let Err(err) = connector.start().await {
                    error!(%err, "Playback failed to start");
                    publish(&events, EmulationEvent::Error(err.to_string()));
                }
            }
            ConnectorEvent::MarketTimeChanged(now) => {
                if let Some(value) = tracker.on_market_time(now) {
                    report_progress(&events, &progress, value);
                }
            }
            ConnectorEvent::StateChanged(ConnectorState::Stopped) => {
                ended.store(true, Ordering::Release);
                strategy.stop();
                if connector.is_finished() {
                    report_progress(&events, &progress, tracker.finish());
                }
                publish(&events, EmulationEvent::StateChanged(EmulationState::Stopped));
            }
            ConnectorEvent::StateChanged(state) => debug!(?state, "Connector state changed"),
            ConnectorEvent::Error(message) => {
                error!(%message, "Connector error");
                publish(&events, EmulationEvent::Error(message));
            }
            ConnectorEvent::Disconnected => {
                let mut slot = run.lock();
                if slot.as_ref().is_some_and(|active| active.id == id) {
                    // dropping the handle detaches this task
                    *slot = None;
                }
                debug!(run = %id, "Connector released");
                break;
            }
        }
    }
}
