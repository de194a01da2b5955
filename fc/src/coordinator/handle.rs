//! CoordinatorHandle - client interface to the engine task

use std::sync::Arc;

use stepchan::{PassthroughChannel, Subscription};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::messages::{EngineMetrics, EngineRequest, UnitDiagnostic};
use crate::error::EngineError;
use crate::events::{DispatchEvent, DispatchFailure};
use crate::flow::{AttachOptions, Flow};
use crate::ids::UnitId;
use crate::step::Step;
use crate::stepper::Stepper;

/// Cloneable client surface of the engine.
///
/// Structural operations go through the engine's request channel; the
/// observer streams are subscribed directly, without a round trip.
#[derive(Clone)]
pub struct CoordinatorHandle<S: Step> {
    tx: mpsc::Sender<EngineRequest<S>>,
    will_dispatch: PassthroughChannel<DispatchEvent<S>>,
    did_dispatch: PassthroughChannel<DispatchEvent<S>>,
    failures: PassthroughChannel<DispatchFailure>,
}

impl<S: Step> CoordinatorHandle<S> {
    pub(crate) fn new(
        tx: mpsc::Sender<EngineRequest<S>>,
        will_dispatch: PassthroughChannel<DispatchEvent<S>>,
        did_dispatch: PassthroughChannel<DispatchEvent<S>>,
        failures: PassthroughChannel<DispatchFailure>,
    ) -> Self {
        Self {
            tx,
            will_dispatch,
            did_dispatch,
            failures,
        }
    }

    /// Create a root coordination unit around a flow/stepper pair and start
    /// routing its steps.
    pub async fn attach_root(
        &self,
        name: &str,
        flow: Arc<dyn Flow<S>>,
        stepper: Arc<dyn Stepper<S>>,
        opts: AttachOptions,
    ) -> Result<UnitId, EngineError> {
        debug!(name, "CoordinatorHandle::attach_root");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::AttachRoot {
                name: name.to_string(),
                flow,
                stepper,
                opts,
                reply_tx,
            })
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        reply_rx.await.map_err(|_| EngineError::ReplyDropped)
    }

    /// Register an additional stepper as a plain listener on an existing
    /// unit.
    pub async fn attach_stepper(
        &self,
        unit: UnitId,
        stepper: Arc<dyn Stepper<S>>,
        opts: AttachOptions,
    ) -> Result<(), EngineError> {
        debug!(%unit, "CoordinatorHandle::attach_stepper");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::AttachStepper {
                unit,
                stepper,
                opts,
                reply_tx,
            })
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        match reply_rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::UnknownUnit(unit)),
            Err(_) => Err(EngineError::ReplyDropped),
        }
    }

    /// Subscribe to a unit's one-shot readiness broadcast. Thanks to its
    /// replay slot, subscribing after readiness still observes it.
    pub async fn ready_subscription(&self, unit: UnitId) -> Result<Subscription<bool>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::GetReady { unit, reply_tx })
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        match reply_rx.await {
            Ok(Some(sub)) => Ok(sub),
            Ok(None) => Err(EngineError::UnknownUnit(unit)),
            Err(_) => Err(EngineError::ReplyDropped),
        }
    }

    /// Wait until a unit has become ready (or was torn down first).
    pub async fn await_ready(&self, unit: UnitId) -> Result<(), EngineError> {
        debug!(%unit, "CoordinatorHandle::await_ready");
        let mut sub = self.ready_subscription(unit).await?;
        // Either a readiness value or stream closure resolves the wait.
        let _ = sub.next().await;
        Ok(())
    }

    /// Tear down a unit and its whole subtree.
    pub async fn teardown(&self, unit: UnitId) -> Result<(), EngineError> {
        debug!(%unit, "CoordinatorHandle::teardown");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Teardown { unit, reply_tx })
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        match reply_rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::UnknownUnit(unit)),
            Err(_) => Err(EngineError::ReplyDropped),
        }
    }

    /// Snapshot per-unit diagnostics, sorted by unit name.
    pub async fn diagnostics(&self) -> Result<Vec<UnitDiagnostic>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::GetDiagnostics { reply_tx })
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        reply_rx.await.map_err(|_| EngineError::ReplyDropped)
    }

    /// Snapshot engine counters.
    pub async fn metrics(&self) -> Result<EngineMetrics, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::GetMetrics { reply_tx })
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        reply_rx.await.map_err(|_| EngineError::ReplyDropped)
    }

    /// Stop the engine, tearing down every unit.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        debug!("CoordinatorHandle::shutdown");
        self.tx
            .send(EngineRequest::Shutdown)
            .await
            .map_err(|_| EngineError::EngineClosed)
    }

    /// Stream of notifications emitted just before each dispatch.
    pub fn will_dispatch(&self) -> Subscription<DispatchEvent<S>> {
        self.will_dispatch.subscribe()
    }

    /// Stream of notifications emitted just after each dispatch.
    pub fn did_dispatch(&self) -> Subscription<DispatchEvent<S>> {
        self.did_dispatch.subscribe()
    }

    /// Stream of user-callback failure reports.
    pub fn dispatch_failures(&self) -> Subscription<DispatchFailure> {
        self.failures.subscribe()
    }
}
