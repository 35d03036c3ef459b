//! Extension Reconciler
//!
//! Watches Extension resources of type `csi-driver-lvm` and dispatches them
//! to the actuator. A finalizer keeps the Extension around until Delete has
//! removed the managed resource; the outcome of every operation is written
//! to the Extension status.

use crate::controller::actuator::ExtensionActuatorRef;
use crate::crd::{
    Extension, LastError, LastOperation, OperationState, OperationType, FINALIZER,
    OPERATION_ANNOTATION, OPERATION_FORCE_DELETE, OPERATION_MIGRATE, OPERATION_RESTORE,
};
use crate::error::{Error, ErrorAction, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event as Finalizer};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Requeue delay for transient failures
pub const BACKOFF_REQUEUE: Duration = Duration::from_secs(15);

// =============================================================================
// Context
// =============================================================================

/// Shared state of the reconciler
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Lifecycle actuator
    pub actuator: ExtensionActuatorRef,
    /// Interval between periodic reconciles of a healthy Extension
    pub resync_period: Duration,
    /// Fired on shutdown, aborts blocking waits
    pub shutdown: CancellationToken,
}

// =============================================================================
// Reconcile
// =============================================================================

/// Reconcile one Extension
pub async fn reconcile(ext: Arc<Extension>, ctx: Arc<Context>) -> Result<Action> {
    if !ext.is_handled() {
        debug!(extension = %ext.name_any(), type_ = %ext.spec.type_, "Ignoring foreign extension type");
        return Ok(Action::await_change());
    }

    let namespace = ext
        .namespace()
        .ok_or_else(|| Error::Internal(format!("Extension {} has no namespace", ext.name_any())))?;
    let api: Api<Extension> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER, ext, |event| async {
        match event {
            Finalizer::Apply(ext) => apply(&api, &ext, &ctx).await,
            Finalizer::Cleanup(ext) => cleanup(&api, &ext, &ctx).await,
        }
    })
    .await
    .map_err(|e| match e {
        FinalizerError::ApplyFailed(err) | FinalizerError::CleanupFailed(err) => err,
        FinalizerError::AddFinalizer(err) | FinalizerError::RemoveFinalizer(err) => Error::Api(err),
        other => Error::Internal(other.to_string()),
    })
}

async fn apply(api: &Api<Extension>, ext: &Extension, ctx: &Context) -> Result<Action> {
    let operation = requested_operation(ext);
    let result = match operation {
        OperationType::Restore => ctx.actuator.restore(ext, &ctx.shutdown).await,
        OperationType::Migrate => ctx.actuator.migrate(ext, &ctx.shutdown).await,
        _ => ctx.actuator.reconcile(ext, &ctx.shutdown).await,
    };

    let patch = status_patch(operation, ext.metadata.generation, &result, Utc::now());
    if let Err(e) = patch_status(api, ext, &patch).await {
        warn!(extension = %ext.name_any(), error = %e, "Failed to update extension status");
    }

    result?;
    if consumes_operation_annotation(ext) {
        remove_operation_annotation(api, ext).await?;
    }
    Ok(Action::requeue(ctx.resync_period))
}

async fn cleanup(api: &Api<Extension>, ext: &Extension, ctx: &Context) -> Result<Action> {
    let result = match cleanup_operation(ext) {
        CleanupOperation::ForceDelete => ctx.actuator.force_delete(ext, &ctx.shutdown).await,
        CleanupOperation::Delete => ctx.actuator.delete(ext, &ctx.shutdown).await,
    };

    // On success the finalizer is removed and the Extension goes away.
    if result.is_err() {
        let patch = status_patch(OperationType::Delete, ext.metadata.generation, &result, Utc::now());
        if let Err(e) = patch_status(api, ext, &patch).await {
            warn!(extension = %ext.name_any(), error = %e, "Failed to update extension status");
        }
    }

    result?;
    Ok(Action::await_change())
}

/// Operation requested through the operation annotation, Reconcile by default
pub fn requested_operation(ext: &Extension) -> OperationType {
    match ext.requested_operation() {
        Some(OPERATION_RESTORE) => OperationType::Restore,
        Some(OPERATION_MIGRATE) => OperationType::Migrate,
        _ => OperationType::Reconcile,
    }
}

/// Operation run for an Extension that is being deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOperation {
    Delete,
    ForceDelete,
}

/// Delete by default, ForceDelete when requested through the annotation
pub fn cleanup_operation(ext: &Extension) -> CleanupOperation {
    match ext.requested_operation() {
        Some(OPERATION_FORCE_DELETE) => CleanupOperation::ForceDelete,
        _ => CleanupOperation::Delete,
    }
}

/// Whether a successful apply removes the operation annotation.
///
/// A `force-delete` request is kept so that it is still present once the
/// Extension gets deleted.
pub fn consumes_operation_annotation(ext: &Extension) -> bool {
    matches!(ext.requested_operation(), Some(op) if op != OPERATION_FORCE_DELETE)
}

// =============================================================================
// Status
// =============================================================================

/// Merge patch recording the outcome of an operation.
///
/// A successful operation clears `lastError`.
pub fn status_patch(
    operation: OperationType,
    generation: Option<i64>,
    result: &Result<()>,
    now: DateTime<Utc>,
) -> Value {
    let (state, description, last_error) = match result {
        Ok(()) => (
            OperationState::Succeeded,
            format!("{} of csi-driver-lvm succeeded", operation),
            None,
        ),
        Err(e) => (
            OperationState::Error,
            format!("{} of csi-driver-lvm failed: {}", operation, e),
            Some(LastError {
                description: e.to_string(),
                codes: vec![e.kind().to_string()],
                last_update_time: Some(now),
            }),
        ),
    };

    let last_operation = LastOperation {
        type_: operation,
        state,
        description,
        last_update_time: Some(now),
    };

    json!({
        "status": {
            "lastOperation": last_operation,
            "lastError": last_error,
            "observedGeneration": generation,
        }
    })
}

async fn patch_status(api: &Api<Extension>, ext: &Extension, patch: &Value) -> Result<()> {
    api.patch_status(&ext.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn remove_operation_annotation(api: &Api<Extension>, ext: &Extension) -> Result<()> {
    let mut annotations = serde_json::Map::new();
    annotations.insert(OPERATION_ANNOTATION.to_string(), Value::Null);
    let patch = json!({ "metadata": { "annotations": annotations } });

    api.patch(&ext.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    debug!(extension = %ext.name_any(), "Removed operation annotation");
    Ok(())
}

// =============================================================================
// Error Policy
// =============================================================================

/// Requeue decision after a failed reconcile
pub fn error_policy(ext: Arc<Extension>, err: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        extension = %ext.name_any(),
        kind = err.kind(),
        error = %err,
        "Reconciliation failed"
    );
    requeue_action(err)
}

/// Map an error to the controller action
pub fn requeue_action(err: &Error) -> Action {
    match err.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(BACKOFF_REQUEUE),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

// =============================================================================
// Controller Loop
// =============================================================================

/// Cancel `token` once `signal` resolves, aborting in-flight waits
pub async fn cancel_on<F>(signal: F, token: CancellationToken)
where
    F: Future<Output = ()>,
{
    signal.await;
    info!("Termination signal received");
    token.cancel();
}

/// Run the controller until a termination signal arrives
pub async fn run(ctx: Arc<Context>, watch_namespace: Option<&str>) -> Result<()> {
    let extensions: Api<Extension> = match watch_namespace {
        Some(namespace) => Api::namespaced(ctx.client.clone(), namespace),
        None => Api::all(ctx.client.clone()),
    };

    if let Err(e) = extensions.list(&ListParams::default().limit(1)).await {
        error!("Extension CRD is not queryable, is it installed? {}", e);
        return Err(e.into());
    }

    info!(namespace = ?watch_namespace, "Starting extension controller");
    Controller::new(extensions, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(object = %object, ?action, "Reconciled"),
                Err(e) => warn!(error = %e, "Reconcile loop error"),
            }
        })
        .await;

    info!("Extension controller stopped");
    Ok(())
}
