//! Reference execution engine that walks a composition socket by socket
//!
//! Each element is entered in evaluation order; its inputs are reported,
//! a nested composition (if any) is run, then its outputs are reported. A
//! suspend decision parks the walk until the controller resumes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, instrument};

use crate::engine::debugger::{DiagramDebugger, SocketDecision};
use crate::graph::{CompositionDiagramElement, DiagramElement, DiagramSocket, GraphError};

/// Decides at every reached socket whether evaluation may continue
#[async_trait]
pub trait StepController: Send + Sync {
    /// Evaluation entered an element
    fn on_element_entered(&self, element: &DiagramElement);

    /// Evaluation reached a socket
    fn on_socket_reached(&self, socket: &DiagramSocket) -> SocketDecision;

    /// Resolve once a suspension has been released
    async fn wait_until_resumed(&self);
}

#[async_trait]
impl StepController for DiagramDebugger {
    fn on_element_entered(&self, element: &DiagramElement) {
        DiagramDebugger::on_element_entered(self, element)
    }

    fn on_socket_reached(&self, socket: &DiagramSocket) -> SocketDecision {
        DiagramDebugger::on_socket_reached(self, socket)
    }

    async fn wait_until_resumed(&self) {
        DiagramDebugger::wait_until_resumed(self).await
    }
}

/// Counters for one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub elements: usize,
    pub sockets: usize,
    pub suspensions: usize,
}

/// Walks compositions, honouring suspend decisions
pub struct DiagramRunner<C: StepController + ?Sized> {
    controller: Arc<C>,
}

impl<C: StepController + ?Sized> DiagramRunner<C> {
    /// Create a runner reporting to `controller`
    pub fn new(controller: Arc<C>) -> Self {
        Self { controller }
    }

    /// Evaluate the composition once, including nested compositions
    #[instrument(skip_all, fields(composition = %composition.name()))]
    pub async fn run_pass(
        &self,
        composition: &CompositionDiagramElement,
    ) -> Result<RunSummary, GraphError> {
        let mut summary = RunSummary::default();
        self.run_composition(composition, &mut summary).await?;
        debug!(?summary, "Pass complete");
        Ok(summary)
    }

    fn run_composition<'a>(
        &'a self,
        composition: &'a CompositionDiagramElement,
        summary: &'a mut RunSummary,
    ) -> BoxFuture<'a, Result<(), GraphError>> {
        Box::pin(async move {
            for element in composition.evaluation_order()? {
                self.controller.on_element_entered(&element);
                summary.elements += 1;

                for socket in element.inputs() {
                    self.reach(socket, summary).await;
                }

                if let Some(nested) = element.composition() {
                    self.run_composition(nested, summary).await?;
                }

                for socket in element.outputs() {
                    self.reach(socket, summary).await;
                }
            }
            Ok(())
        })
    }

    async fn reach(&self, socket: &DiagramSocket, summary: &mut RunSummary) {
        summary.sockets += 1;
        if self.controller.on_socket_reached(socket) == SocketDecision::Suspend {
            summary.suspensions += 1;
            self.controller.wait_until_resumed().await;
        }
    }
}
