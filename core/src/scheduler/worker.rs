use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use crate::prelude::{MomentsError, MomentsResult};
use crate::processing::{MomentsEngine, RayResult};
use crate::ray_interface::{Calibration, CovarianceRay};
use crate::telemetry::LogRecord;

pub(crate) struct WorkItem {
    pub index: usize,
    pub ray: CovarianceRay,
    pub calibration: Arc<Calibration>,
}

pub(crate) struct WorkReply {
    pub index: usize,
    pub elevation_deg: f64,
    pub result: MomentsResult<RayResult>,
    pub logs: Vec<LogRecord>,
}

/// One long-lived worker thread owning one engine. Work and replies go
/// through a capacity-1 channel pair, so a worker holds at most one ray.
pub(crate) struct Worker {
    pub id: usize,
    pub in_flight: Option<usize>,
    work_tx: Option<mpsc::Sender<WorkItem>>,
    reply_rx: mpsc::Receiver<WorkReply>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(id: usize, mut engine: MomentsEngine) -> MomentsResult<Self> {
        let (work_tx, mut work_rx) = mpsc::channel::<WorkItem>(1);
        let (reply_tx, reply_rx) = mpsc::channel::<WorkReply>(1);

        let handle = thread::Builder::new()
            .name(format!("cov2mom-worker-{id}"))
            .spawn(move || {
                while let Some(item) = work_rx.blocking_recv() {
                    let result = engine.compute(&item.ray, &item.calibration);
                    let reply = WorkReply {
                        index: item.index,
                        elevation_deg: item.ray.context.elevation_deg,
                        result,
                        logs: engine.take_logs(),
                    };
                    if reply_tx.blocking_send(reply).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| MomentsError::Configuration(format!("spawning worker {id}: {err}")))?;

        Ok(Self {
            id,
            in_flight: None,
            work_tx: Some(work_tx),
            reply_rx,
            handle: Some(handle),
        })
    }

    pub fn submit(&mut self, item: WorkItem) -> MomentsResult<()> {
        let index = item.index;
        let sender = self.work_tx.as_ref().ok_or(MomentsError::WorkerLost(self.id))?;
        sender
            .blocking_send(item)
            .map_err(|_| MomentsError::WorkerLost(self.id))?;
        self.in_flight = Some(index);
        Ok(())
    }

    /// Blocks until the in-flight ray completes. `None` if the thread is gone.
    pub fn collect(&mut self) -> Option<WorkReply> {
        let reply = self.reply_rx.blocking_recv();
        self.in_flight = None;
        reply
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // closing the work channel ends the thread at its next idle point
        self.work_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("worker {} panicked", self.id);
            }
        }
    }
}
