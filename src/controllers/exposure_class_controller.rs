//! ExposureClass controller
//!
//! Feeds watch events into the work queue and drains it with a pool of
//! reconcile workers until shutdown.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::controllers::dispatcher::{dispatch_dependent_events, dispatch_parent_events};
use crate::controllers::{Context, ExponentialBackoff, WorkQueue};
use crate::error::Result;
use crate::metrics;
use crate::reconcilers::exposure_class::KIND;
use crate::reconcilers::{ExposureClassReconciler, Outcome};
use crate::store::ObjectKey;

/// Run the ExposureClass controller until `shutdown` fires
pub async fn run(context: Arc<Context>, shutdown: CancellationToken) {
    let config = &context.config;
    let queue = Arc::new(WorkQueue::new(ExponentialBackoff::new(
        config.backoff_base(),
        config.backoff_max(),
    )));
    let reconciler = Arc::new(ExposureClassReconciler::new(
        context.store.clone(),
        config.conflict_retries,
    ));

    info!(workers = config.workers, "Starting ExposureClass controller");

    let dispatchers = vec![
        tokio::spawn(dispatch_parent_events(
            context.store.watch_parents(),
            queue.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(dispatch_dependent_events(
            context.store.watch_dependents(),
            queue.clone(),
            shutdown.clone(),
        )),
    ];

    let workers: Vec<_> = (0..config.workers)
        .map(|id| {
            tokio::spawn(worker(
                id,
                queue.clone(),
                reconciler.clone(),
                context.clone(),
                shutdown.clone(),
            ))
        })
        .collect();

    shutdown.cancelled().await;
    info!("Stopping ExposureClass controller");
    queue.shut_down();

    for result in join_all(dispatchers.into_iter().chain(workers)).await {
        if let Err(e) = result {
            error!(error = %e, "Controller task failed");
        }
    }
    info!("ExposureClass controller stopped");
}

/// Drain the queue one identity at a time
async fn worker(
    id: usize,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<ExposureClassReconciler>,
    context: Arc<Context>,
    shutdown: CancellationToken,
) {
    while let Some(key) = queue.get().await {
        metrics::QUEUE_DEPTH
            .with_label_values(&[KIND])
            .set(queue.len() as f64);

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                queue.done(&key);
                break;
            }
            result = reconcile(&key, &reconciler) => result,
        };

        match result {
            Ok(Outcome::Blocked) => {
                queue.forget(&key);
                queue.add_after(key.clone(), context.config.poll_interval());
            }
            Ok(_) => queue.forget(&key),
            Err(e) => {
                warn!(
                    worker = id,
                    name = %key,
                    error = %e,
                    retries = queue.num_requeues(&key),
                    "Reconciliation failed, scheduling retry"
                );
                metrics::QUEUE_RETRIES.with_label_values(&[KIND]).inc();
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
}

/// One timed and counted reconcile pass
#[instrument(skip_all, fields(name = %key))]
async fn reconcile(key: &ObjectKey, reconciler: &ExposureClassReconciler) -> Result<Outcome> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let result = reconciler.reconcile(key).await;
    match &result {
        Ok(outcome) => {
            info!(outcome = %outcome, "Reconciled ExposureClass");
            metrics::RECONCILE_OUTCOMES
                .with_label_values(&[KIND, outcome.as_str()])
                .inc();
        }
        Err(e) => {
            error!(error = %e, "Reconciliation error");
            metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
            metrics::RECONCILE_OUTCOMES
                .with_label_values(&[KIND, "error"])
                .inc();
        }
    }
    result
}
