//! Integration tests for debugger sessions and command routing

mod support;

use diagram_debugger::{
    bus::{CommandBus, CommandKind, StudioCommand},
    config::{DebuggerSettings, SettingsStore, DEBUGGER_SETTINGS_KEY},
    control::ControlKind,
    engine::{DebuggerState, DiagramRunner},
    graph::{CompositionBuilder, CompositionDiagramElement, DiagramElement, ElementId, SocketId},
    session::DebuggerSession,
    strategy::DiagramStrategy,
    DesignerError, Result,
};
use diagram_debugger::engine::DebuggerError;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{eventually, settings_with_market_data, simple_composition, CallLog, MockStrategy};
use uuid::Uuid;

fn strategy(composition: CompositionDiagramElement) -> Arc<MockStrategy> {
    MockStrategy::new(composition, settings_with_market_data(), CallLog::default())
}

/// Root: Wrapper(In, Out) around Inner(X)
fn nested_composition() -> (CompositionDiagramElement, ElementId, ElementId) {
    let inner = DiagramElement::new("Inner", Uuid::new_v4()).with_input("X");
    let inner_id = inner.id();
    let body = CompositionBuilder::new("body").add_element(inner).build().unwrap();
    let wrapper = DiagramElement::composite("Wrapper", body)
        .with_input("In")
        .with_output("Out");
    let wrapper_id = wrapper.id();
    let root = CompositionBuilder::new("root").add_element(wrapper).build().unwrap();
    (root, wrapper_id, inner_id)
}

/// Binding marks the composition read-only and creates a debugger
#[tokio::test]
async fn test_bind_strategy_through_bus() -> Result<()> {
    let bus = Arc::new(CommandBus::new());
    let session = DebuggerSession::new(ControlKind::EmulationRun, bus.clone(), None);
    let strategy = strategy(simple_composition());

    assert!(bus.process(session.scope(), &StudioCommand::BindStrategy(Some(strategy.clone())))?);

    assert!(session.debugger().is_some());
    assert!(!strategy.composition().is_modifiable());
    assert!(Arc::ptr_eq(&session.displayed_composition(), &strategy.composition()));

    bus.process(session.scope(), &StudioCommand::BindStrategy(None))?;
    assert!(session.debugger().is_none());
    assert!(!session.displayed_composition().is_modifiable());

    Ok(())
}

/// Breakpoint commands act on the selected socket and are guarded
#[tokio::test]
async fn test_breakpoint_commands_follow_selection() -> Result<()> {
    let bus = Arc::new(CommandBus::new());
    let store = Arc::new(SettingsStore::in_memory());
    let session = DebuggerSession::new(ControlKind::LiveRun, bus.clone(), Some(store.clone()));
    let strategy = strategy(simple_composition());
    session.bind_strategy(Some(strategy.clone()));
    let scope = session.scope();

    // nothing selected
    assert!(!bus.can_process(scope, &StudioCommand::AddBreakpoint));

    let socket = strategy.composition().elements()[0].socket_id("Price");
    session.select_socket(Some(socket.clone()));
    assert!(bus.can_process(scope, &StudioCommand::AddBreakpoint));
    assert!(!bus.can_process(scope, &StudioCommand::RemoveBreakpoint));

    bus.process(scope, &StudioCommand::AddBreakpoint)?;
    let debugger = session.debugger().unwrap();
    assert!(debugger.is_breakpoint(&socket));

    // the change is persisted
    let saved: DebuggerSettings = store.get(DEBUGGER_SETTINGS_KEY)?.unwrap();
    assert_eq!(saved.breakpoints, vec![socket.clone()]);

    assert!(matches!(
        bus.process(scope, &StudioCommand::AddBreakpoint),
        Err(DesignerError::Debugger(DebuggerError::InvalidState(_)))
    ));

    bus.process(scope, &StudioCommand::RemoveBreakpoint)?;
    assert!(!debugger.is_breakpoint(&socket));

    Ok(())
}

/// Step commands are rejected while the debugger is running
#[tokio::test]
async fn test_step_commands_require_suspension() -> Result<()> {
    let bus = Arc::new(CommandBus::new());
    let session = DebuggerSession::new(ControlKind::EmulationRun, bus.clone(), None);
    session.bind_strategy(Some(strategy(simple_composition())));
    bus.process(session.scope(), &StudioCommand::DebuggerState(true))?;

    for command in [StudioCommand::StepNext, StudioCommand::Continue, StudioCommand::StepOut] {
        assert!(!bus.can_process(session.scope(), &command));
        assert!(bus.process(session.scope(), &command).is_err());
    }
    assert_eq!(session.debugger().unwrap().state(), DebuggerState::Running);

    Ok(())
}

/// A run walks into the nested composition through bus commands; the
/// session follows breaks and focus changes
#[tokio::test]
async fn test_session_follows_nested_stepping() -> Result<()> {
    let (root, wrapper, inner) = nested_composition();
    let bus = Arc::new(CommandBus::new());
    let session = DebuggerSession::new(ControlKind::EmulationRun, bus.clone(), None);
    let strategy = strategy(root);
    session.bind_strategy(Some(strategy.clone()));
    let scope = session.scope();

    bus.process(scope, &StudioCommand::DebuggerState(true))?;
    session.select_socket(Some(SocketId::new(wrapper, "In")));
    bus.process(scope, &StudioCommand::AddBreakpoint)?;

    let debugger = session.debugger().unwrap();
    let runner = DiagramRunner::new(debugger.clone());
    let composition = strategy.composition();
    let run = tokio::spawn(async move { runner.run_pass(&composition).await });

    assert!(eventually(|| debugger.is_waiting()).await);
    assert!(eventually(|| session.selection().element == Some(wrapper)).await);

    assert!(bus.process(scope, &StudioCommand::StepInto)?);
    assert!(eventually(|| session.displayed_composition().name() == "body").await);
    assert!(eventually(|| debugger.suspended_socket().is_some_and(|s| s.parent() == inner)).await);
    assert!(eventually(|| session.selection().element == Some(inner)).await);

    assert!(bus.process(scope, &StudioCommand::StepOut)?);
    assert!(eventually(|| session.displayed_composition().name() == "root").await);
    assert!(eventually(|| debugger.suspended_socket().is_some_and(|s| s.name() == "Out")).await);

    bus.process(scope, &StudioCommand::Continue)?;
    let summary = run.await.unwrap()?;
    assert_eq!(summary.suspensions, 3);

    Ok(())
}

/// Rebinding releases a run parked on the replaced debugger
#[tokio::test]
async fn test_rebind_releases_parked_run() -> Result<()> {
    let bus = Arc::new(CommandBus::new());
    let session = DebuggerSession::new(ControlKind::EmulationRun, bus.clone(), None);
    let first = strategy(simple_composition());
    session.bind_strategy(Some(first.clone()));
    let scope = session.scope();

    bus.process(scope, &StudioCommand::DebuggerState(true))?;
    session.select_socket(Some(first.composition().elements()[0].socket_id("Price")));
    bus.process(scope, &StudioCommand::AddBreakpoint)?;

    let replaced = session.debugger().unwrap();
    let runner = DiagramRunner::new(replaced.clone());
    let composition = first.composition();
    let run = tokio::spawn(async move { runner.run_pass(&composition).await });
    assert!(eventually(|| replaced.is_waiting()).await);

    session.bind_strategy(Some(strategy(simple_composition())));

    let summary = tokio::time::timeout(std::time::Duration::from_secs(2), run)
        .await
        .expect("run on the replaced debugger stayed parked")
        .unwrap()?;
    assert_eq!(summary.suspensions, 1);
    assert_eq!(replaced.state(), DebuggerState::Disabled);
    assert!(!Arc::ptr_eq(&replaced, &session.debugger().unwrap()));

    Ok(())
}

/// Disposing a session releases a run parked on its debugger
#[tokio::test]
async fn test_dispose_releases_parked_run() -> Result<()> {
    let bus = Arc::new(CommandBus::new());
    let session = DebuggerSession::new(ControlKind::LiveRun, bus.clone(), None);
    let strategy = strategy(simple_composition());
    session.bind_strategy(Some(strategy.clone()));

    let debugger = session.debugger().unwrap();
    debugger.set_enabled(true);
    debugger.add_breakpoint(&strategy.composition().elements()[0].socket_id("Value"))?;

    let runner = DiagramRunner::new(debugger.clone());
    let composition = strategy.composition();
    let run = tokio::spawn(async move { runner.run_pass(&composition).await });
    assert!(eventually(|| debugger.is_waiting()).await);

    session.dispose();

    let summary = tokio::time::timeout(std::time::Duration::from_secs(2), run)
        .await
        .expect("run stayed parked after dispose")
        .unwrap()?;
    assert_eq!(summary.suspensions, 1);
    assert!(session.debugger().is_none());

    Ok(())
}

/// A reset releases the previous run but keeps the breakpoints
#[tokio::test]
async fn test_reset_between_runs() -> Result<()> {
    let bus = Arc::new(CommandBus::new());
    let session = DebuggerSession::new(ControlKind::EmulationRun, bus.clone(), None);
    let strategy = strategy(simple_composition());
    session.bind_strategy(Some(strategy.clone()));
    let scope = session.scope();

    let socket = strategy.composition().elements()[0].socket("Price").cloned().unwrap();
    bus.process(scope, &StudioCommand::DebuggerState(true))?;
    session.select_socket(Some(socket.id.clone()));
    bus.process(scope, &StudioCommand::AddBreakpoint)?;

    let debugger = session.debugger().unwrap();
    debugger.on_socket_reached(&socket);
    assert!(debugger.is_waiting());

    assert!(bus.process(scope, &StudioCommand::Reset)?);
    assert_eq!(debugger.state(), DebuggerState::Running);
    assert!(debugger.is_breakpoint(&socket.id));
    assert_eq!(session.selection().socket, None);

    Ok(())
}

/// Saved settings survive a rebind and a settings file round trip
#[tokio::test]
async fn test_settings_restored_on_rebind() -> Result<()> {
    let path = std::env::temp_dir().join(format!("session-settings-{}.json", Uuid::new_v4()));
    let bus = Arc::new(CommandBus::new());
    let store = Arc::new(SettingsStore::with_path(&path));
    let session = DebuggerSession::new(ControlKind::EmulationRun, bus.clone(), Some(store.clone()));
    let strategy = strategy(simple_composition());

    session.bind_strategy(Some(strategy.clone()));
    let socket = strategy.composition().elements()[0].socket_id("Value");
    let debugger = session.debugger().unwrap();
    debugger.set_enabled(true);
    debugger.add_breakpoint(&socket)?;
    session.save()?;
    store.save()?;

    // a fresh session over a reopened store
    let reopened = Arc::new(SettingsStore::with_path(&path));
    reopened.load()?;
    let restored = DebuggerSession::new(ControlKind::EmulationRun, bus.clone(), Some(reopened));
    restored.load()?;
    restored.bind_strategy(Some(strategy.clone()));

    let debugger = restored.debugger().unwrap();
    assert!(debugger.is_enabled());
    assert!(debugger.is_breakpoint(&socket));

    std::fs::remove_file(path).ok();
    Ok(())
}

/// Dispose removes every handler of the session and nothing else
#[tokio::test]
async fn test_dispose_unregisters_handlers() -> Result<()> {
    let bus = Arc::new(CommandBus::new());
    let session = DebuggerSession::new(ControlKind::EmulationRun, bus.clone(), None);
    let editor = DebuggerSession::new(ControlKind::DiagramEditor, bus.clone(), None);

    assert!(bus.is_registered(CommandKind::StepNext, session.scope()));
    assert!(!bus.is_registered(CommandKind::StepNext, editor.scope()));
    assert!(bus.is_registered(CommandKind::BindStrategy, editor.scope()));

    session.dispose();

    for kind in CommandKind::DEBUGGER {
        assert!(!bus.is_registered(kind, session.scope()));
    }
    assert!(!bus.process(session.scope(), &StudioCommand::BindStrategy(None))?);
    assert!(bus.is_registered(CommandKind::BindStrategy, editor.scope()));

    Ok(())
}
