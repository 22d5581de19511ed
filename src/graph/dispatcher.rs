//! Background dispatch for the delete/compaction pipeline.
//!
//! Events are queued to a single worker thread off the write path. The
//! submitter gets a reply channel per event; errors surface there and are
//! never retried internally. The worker owns the pipeline components, so
//! event handling is strictly sequential per dispatcher.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::error::{Result, StoreError};
use crate::graph::{EdgeWriteCompactor, GraphId, MarkedEdge, NodeDeleteListener};
use crate::model::ApplicationScope;

/// Work items the pipeline consumes.
pub enum PipelineEvent {
    /// An edge version was durably staged in the commit log.
    EdgeWritten {
        scope: ApplicationScope,
        edge: MarkedEdge,
    },
    /// A node was tombstoned.
    NodeMarked {
        scope: ApplicationScope,
        node: GraphId,
    },
    /// Stop the worker after draining nothing further.
    Shutdown,
}

struct Envelope {
    event: PipelineEvent,
    reply: mpsc::Sender<Result<usize>>,
}

pub struct PipelineDispatcher {
    sender: mpsc::Sender<Envelope>,
    worker: Option<JoinHandle<()>>,
}

impl PipelineDispatcher {
    pub fn new(compactor: EdgeWriteCompactor, deletes: NodeDeleteListener) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Envelope>();

        let worker = thread::Builder::new()
            .name("edge-pipeline".into())
            .spawn(move || {
                while let Ok(Envelope { event, reply }) = receiver.recv() {
                    let result = match &event {
                        PipelineEvent::EdgeWritten { scope, edge } => {
                            compactor.compact(scope, edge)
                        }
                        PipelineEvent::NodeMarked { scope, node } => deletes.receive(scope, node),
                        PipelineEvent::Shutdown => {
                            let _ = reply.send(Ok(0));
                            break;
                        }
                    };
                    if let Err(e) = &result {
                        error!(error = %e, "pipeline event failed");
                    }
                    let _ = reply.send(result);
                }
                info!("edge pipeline worker stopped");
            })?;

        Ok(Self {
            sender,
            worker: Some(worker),
        })
    }

    /// Queues an event; the returned receiver yields its outcome (edges or
    /// versions affected).
    pub fn submit(&self, event: PipelineEvent) -> Result<mpsc::Receiver<Result<usize>>> {
        let (reply, receiver) = mpsc::channel();
        self.sender
            .send(Envelope { event, reply })
            .map_err(|_| StoreError::Storage("pipeline worker is gone".into()))?;
        Ok(receiver)
    }

    /// Queues an event and blocks for its outcome.
    pub fn submit_and_wait(&self, event: PipelineEvent) -> Result<usize> {
        self.submit(event)?
            .recv()
            .map_err(|_| StoreError::Storage("pipeline worker dropped the reply".into()))?
    }
}

impl Drop for PipelineDispatcher {
    fn drop(&mut self) {
        let _ = self.submit(PipelineEvent::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
