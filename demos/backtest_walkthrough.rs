//! Backtest walkthrough
//!
//! Builds a small strategy diagram, starts an emulation run over a scripted
//! history connector and steps through the diagram with breakpoints, all
//! driven through the command bus the way designer controls drive it.
//!
//! Run with `RUST_LOG=diagram_debugger=debug` for engine logs.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use diagram_debugger::{
    bus::{CommandBus, ScopeToken, StudioCommand},
    config::{DesignerConfig, EmulationSettings, MarketDataSettings, SettingsStore, StorageFormat},
    control::ControlKind,
    emulation::{
        CommissionRule, ConnectorEvent, ConnectorFactory, ConnectorState, EmulationError,
        EmulationEvent, EmulationOrchestrator, EmulationState, HistoryConnector, HistoryRunConfig,
    },
    engine::{DebuggerEvent, DiagramDebugger, DiagramRunner},
    graph::{CompositionBuilder, CompositionDiagramElement, DiagramElement},
    session::DebuggerSession,
    strategy::{DiagramStrategy, ProcessState, StrategyBinding},
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Replays one market-time notification per candle on a timer
struct ReplayConnector {
    config: HistoryRunConfig,
    state: Arc<Mutex<ConnectorState>>,
    finished: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectorEvent>,
}

#[async_trait]
impl HistoryConnector for ReplayConnector {
    async fn connect(&self) -> Result<(), EmulationError> {
        let _ = self.events.send(ConnectorEvent::Connected);
        let _ = self.events.send(ConnectorEvent::SecurityLookupCompleted);
        Ok(())
    }

    async fn start(&self) -> Result<(), EmulationError> {
        *self.state.lock() = ConnectorState::Started;

        let (events, state, finished) = (self.events.clone(), self.state.clone(), self.finished.clone());
        let (start, stop) = (self.config.start, self.config.stop);
        let step = ChronoDuration::from_std(self.config.market_time_interval)
            .map_err(|err| EmulationError::Connector(err.to_string()))?;

        tokio::spawn(async move {
            let mut now = start;
            while now < stop && *state.lock() == ConnectorState::Started {
                now += step;
                let _ = events.send(ConnectorEvent::MarketTimeChanged(now.min(stop)));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            finished.store(now >= stop, Ordering::SeqCst);
            *state.lock() = ConnectorState::Stopped;
            let _ = events.send(ConnectorEvent::StateChanged(ConnectorState::Stopped));
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EmulationError> {
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
        println!("  commission rule: {rule:?}");
        Ok(())
    }
}

struct ReplayFactory;

impl ConnectorFactory for ReplayFactory {
    fn create(&self, config: HistoryRunConfig) -> Result<Arc<dyn HistoryConnector>, EmulationError> {
        let (events, _) = broadcast::channel(1024);
        Ok(Arc::new(ReplayConnector {
            config,
            state: Arc::new(Mutex::new(ConnectorState::Stopped)),
            finished: Arc::new(AtomicBool::new(false)),
            events,
        }))
    }
}

/// Evaluates its diagram a few times once started
struct WalkthroughStrategy {
    composition: Arc<CompositionDiagramElement>,
    state: Mutex<ProcessState>,
    debugger: Mutex<Option<Arc<DiagramDebugger>>>,
}

impl DiagramStrategy for WalkthroughStrategy {
    fn name(&self) -> &str {
        "sma crossover"
    }

    fn composition(&self) -> Arc<CompositionDiagramElement> {
        self.composition.clone()
    }

    fn emulation_settings(&self) -> EmulationSettings {
        let stop = Utc::now();
        EmulationSettings {
            market_data: Some(MarketDataSettings {
                path: PathBuf::from("history"),
                storage_format: StorageFormat::Binary,
            }),
            start: stop - ChronoDuration::days(5),
            stop,
            candle_time_frame_secs: 3600,
            ..EmulationSettings::default()
        }
    }

    fn process_state(&self) -> ProcessState {
        *self.state.lock()
    }

    fn reset(&self) {}

    fn bind(&self, binding: StrategyBinding) {
        println!("  trading {} from '{}'", binding.security.id, binding.portfolio.name);
    }

    fn start(&self) -> Result<(), EmulationError> {
        *self.state.lock() = ProcessState::Started;

        let Some(debugger) = self.debugger.lock().clone() else {
            return Err(EmulationError::Strategy("no debugger attached".to_string()));
        };
        let composition = self.composition.clone();
        tokio::spawn(async move {
            let runner = DiagramRunner::new(debugger);
            for pass in 1..=2 {
                match runner.run_pass(&composition).await {
                    Ok(summary) => println!("  pass {pass}: {summary:?}"),
                    Err(err) => eprintln!("  pass {pass} failed: {err}"),
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        *self.state.lock() = ProcessState::Stopped;
    }
}

fn build_composition() -> anyhow::Result<CompositionDiagramElement> {
    let kind = Uuid::new_v4();

    let average = DiagramElement::new("Average", kind).with_input("Values").with_output("Mean");
    let sma = CompositionBuilder::new("sma").add_element(average).build()?;

    let price = DiagramElement::new("Price", kind).with_output("Close");
    let indicator = DiagramElement::composite("Sma", sma).with_input("Source").with_output("Value");
    let signal = DiagramElement::new("Signal", kind).with_input("Trend");

    let (close, source) = (price.socket_id("Close"), indicator.socket_id("Source"));
    let (value, trend) = (indicator.socket_id("Value"), signal.socket_id("Trend"));

    Ok(CompositionBuilder::new("sma crossover")
        .add_element(signal)
        .add_element(indicator)
        .add_element(price)
        .connect(close, source)
        .connect(value, trend)
        .build()?)
}

async fn next_break(events: &mut broadcast::Receiver<DebuggerEvent>) -> anyhow::Result<String> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .context("no break within 5s")??;
        if let DebuggerEvent::Break { socket, reason } = event {
            return Ok(format!("{} ({reason:?})", socket.name));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("diagram_debugger=info")),
        )
        .init();

    println!("Strategy diagram backtest walkthrough");
    println!("=====================================");

    let bus = Arc::new(CommandBus::new());
    let scope = ScopeToken::new();
    let settings_path = std::env::temp_dir().join(format!("walkthrough-{}.json", Uuid::new_v4()));
    let config = DesignerConfig {
        settings_path: Some(settings_path.clone()),
        flush_interval_ms: 50,
        ..DesignerConfig::default()
    };
    let store = Arc::new(SettingsStore::from_config(&config));
    let flush = store.spawn_debounced_flush(config.flush_interval());

    let session = DebuggerSession::with_scope(ControlKind::EmulationRun, scope, bus.clone(), Some(store.clone()));
    let orchestrator = Arc::new(EmulationOrchestrator::from_config(
        Arc::new(ReplayFactory),
        bus.clone(),
        scope,
        &config,
        Some(store.clone()),
    ));
    orchestrator.register_commands();

    let strategy = Arc::new(WalkthroughStrategy {
        composition: Arc::new(build_composition()?),
        state: Mutex::new(ProcessState::Stopped),
        debugger: Mutex::new(None),
    });

    bus.process(scope, &StudioCommand::BindStrategy(Some(strategy.clone())))?;
    orchestrator.set_strategy(Some(strategy.clone()));
    let debugger = session.debugger().context("strategy bound without debugger")?;
    *strategy.debugger.lock() = Some(debugger.clone());

    // breakpoint on the indicator input, picked the way the editor does
    let indicator = strategy
        .composition()
        .elements()
        .iter()
        .find(|e| e.name == "Sma")
        .map(|e| e.socket_id("Source"))
        .context("indicator missing")?;
    session.select_socket(Some(indicator));
    bus.process(scope, &StudioCommand::AddBreakpoint)?;

    let mut debugger_events = debugger.subscribe();
    let mut emulation_events = orchestrator.subscribe();

    println!("\nStarting emulation");
    bus.process(scope, &StudioCommand::StartEmulation)?;

    println!("  break at {}", next_break(&mut debugger_events).await?);
    bus.process(scope, &StudioCommand::StepInto)?;
    println!("  stepped into '{}'", debugger.current_composition().name());
    println!("  break at {}", next_break(&mut debugger_events).await?);

    bus.process(scope, &StudioCommand::StepOut)?;
    println!("  break at {}", next_break(&mut debugger_events).await?);

    bus.process(scope, &StudioCommand::StepNext)?;
    println!("  break at {}", next_break(&mut debugger_events).await?);

    bus.process(scope, &StudioCommand::Continue)?;

    // second pass stops on the breakpoint again
    println!("  break at {}", next_break(&mut debugger_events).await?);
    bus.process(scope, &StudioCommand::Continue)?;

    println!("\nPlayback");
    loop {
        match tokio::time::timeout(Duration::from_secs(5), emulation_events.recv()).await {
            Ok(Ok(EmulationEvent::Progress(value))) if value % 25 == 0 => println!("  {value}%"),
            Ok(Ok(EmulationEvent::StateChanged(EmulationState::Stopped))) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(EmulationEvent::Error(message))) => {
                eprintln!("  error: {message}");
                break;
            }
            Ok(Ok(_)) => {}
        }
    }

    bus.process(scope, &StudioCommand::StopEmulation).ok();
    orchestrator.stop().await;

    session.save()?;
    session.dispose();
    flush.shutdown().await;
    println!("\nDebugger settings written to {}", settings_path.display());
    std::fs::remove_file(&settings_path).ok();

    Ok(())
}
