//! Background worker pool for pipeline tasks
//!
//! A single dispatcher pulls tasks off the queue and spawns each one once a
//! semaphore permit is free. Cancelling the shutdown token stops dispatch;
//! tasks already running are allowed to finish.

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::orchestrator::Orchestrator;
use super::tasks::PipelineTask;

/// Handle to the running dispatcher
pub struct WorkerPool {
    dispatcher: JoinHandle<()>,
}

impl WorkerPool {
    /// Start dispatching tasks from `receiver`
    pub fn spawn(
        orchestrator: Arc<Orchestrator>,
        receiver: mpsc::UnboundedReceiver<PipelineTask>,
        max_concurrent: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        tracing::info!(max_concurrent, "Pipeline worker pool started");

        let dispatcher = tokio::spawn(dispatch(orchestrator, receiver, max_concurrent, shutdown));
        Self { dispatcher }
    }

    /// Wait for the dispatcher and every in-flight task to finish
    pub async fn join(self) {
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "Pipeline dispatcher panicked");
        }
    }
}

async fn dispatch(
    orchestrator: Arc<Orchestrator>,
    mut receiver: mpsc::UnboundedReceiver<PipelineTask>,
    max_concurrent: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            task = receiver.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(stage = task.stage(), "Shutdown before dispatch, task dropped");
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let _permit = permit;
            let stage = task.stage();
            if let Err(e) = orchestrator.run_task(task).await {
                tracing::error!(stage, error = %e, "Pipeline task failed");
            }
        });
    }

    // Every permit back means every spawned task has finished
    let drained = semaphore.acquire_many(max_concurrent as u32).await;
    match drained {
        Ok(_) => tracing::info!("Pipeline worker pool stopped"),
        Err(e) => tracing::warn!(error = %e, "Pipeline worker pool stopped without draining"),
    }
}
