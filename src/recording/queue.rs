// Serialized encode queue with a counting join
//
// Producer: capture callbacks submit encode jobs and return immediately
// Consumer: one background thread runs jobs in FIFO order, so encoder writes
// never interleave

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Messages sent to the worker thread
enum QueueMessage {
    Job(Job, InFlightGuard),
    Shutdown,
}

/// Counting join primitive: enter per dispatch, leave on completion
#[derive(Debug, Default)]
pub struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one unit of outstanding work; dropping the guard leaves
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard { owner: Arc::clone(self) }
    }

    fn leave(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    pub fn pending(&self) -> usize {
        *self.count.lock()
    }

    /// Block until every entered unit has left
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}

/// Leaves the owning `InFlight` on drop, including when a job panics
#[derive(Debug)]
pub struct InFlightGuard {
    owner: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.owner.leave();
    }
}

/// Single-consumer FIFO work queue on a named background thread
pub struct EncodeQueue {
    sender: Sender<QueueMessage>,
    worker: Option<std::thread::JoinHandle<()>>,
    in_flight: Arc<InFlight>,
}

impl EncodeQueue {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<QueueMessage>();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::worker_main(receiver))?;

        Ok(Self {
            sender,
            worker: Some(worker),
            in_flight: InFlight::new(),
        })
    }

    fn worker_main(receiver: Receiver<QueueMessage>) {
        while let Ok(message) = receiver.recv() {
            match message {
                QueueMessage::Job(job, _guard) => {
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                        log::error!("Encode job panicked; continuing with the next job");
                    }
                }
                QueueMessage::Shutdown => break,
            }
        }
    }

    /// Queue a job without blocking. Returns false if the worker is gone.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.in_flight.enter();
        // On failure the message (and its guard) is dropped, which leaves again
        self.sender.send(QueueMessage::Job(Box::new(job), guard)).is_ok()
    }

    pub fn pending(&self) -> usize {
        self.in_flight.pending()
    }

    /// Block until every submitted job has completed
    pub fn wait_idle(&self) {
        self.in_flight.wait();
    }

    /// Drain the queue and join the worker thread
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.sender.send(QueueMessage::Shutdown);
            if handle.join().is_err() {
                log::error!("Encode queue worker panicked");
            }
        }
    }
}

impl Drop for EncodeQueue {
    fn drop(&mut self) {
        if self.worker.is_some() {
            // Don't join in drop; the worker exits once it reaches Shutdown
            let _ = self.sender.send(QueueMessage::Shutdown);
        }
    }
}
