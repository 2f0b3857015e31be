//! Pipeline task messages and the queue that carries them

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{ForgeError, ForgeResult};

/// One unit of pipeline work
///
/// Payloads carry ids only; every stage re-reads state from the database,
/// so re-delivering a task is safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum PipelineTask {
    /// Stage 1: fetch and extract text (or hand a file to the vision path)
    Extract { source_id: Uuid },
    /// Stage 2: generate and persist cards
    Generate { source_id: Uuid, vision: bool },
    /// Stage 3: embed and index cards
    Embed { card_ids: Vec<Uuid> },
}

impl PipelineTask {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineTask::Extract { .. } => "extract",
            PipelineTask::Generate { .. } => "generate",
            PipelineTask::Embed { .. } => "embed",
        }
    }
}

/// Sending half of the pipeline queue
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<PipelineTask>,
}

impl TaskQueue {
    /// Create a queue and the receiver the worker pool consumes
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, task: PipelineTask) -> ForgeResult<()> {
        let stage = task.stage();
        self.tx.send(task).map_err(|_| {
            ForgeError::Common(recall_common::Error::Internal(format!(
                "Pipeline queue closed, dropped {} task",
                stage
            )))
        })?;
        tracing::debug!(stage, "Task enqueued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_preserves_order() {
        let (queue, mut rx) = TaskQueue::new();
        let source_id = Uuid::new_v4();

        queue.enqueue(PipelineTask::Extract { source_id }).unwrap();
        queue
            .enqueue(PipelineTask::Generate { source_id, vision: false })
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), PipelineTask::Extract { source_id });
        assert_eq!(rx.try_recv().unwrap().stage(), "generate");
    }

    #[test]
    fn test_enqueue_after_receiver_dropped_fails() {
        let (queue, rx) = TaskQueue::new();
        drop(rx);
        assert!(queue
            .enqueue(PipelineTask::Embed { card_ids: vec![] })
            .is_err());
    }
}
