//! FIFO worker streams.
//!
//! One OS thread per stream. Jobs execute strictly in submission order
//! within a stream; distinct streams run concurrently. The host blocks
//! only inside [`Stream::sync`].

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use crate::errors::DeviceError;

enum Job {
    Run(Box<dyn FnOnce() + Send + 'static>),
    Sync(Sender<()>),
}

pub struct Stream {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn spawn(name: impl Into<String>) -> Result<Self, DeviceError> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Run(f) => f(),
                        Job::Sync(ack) => {
                            // receiver may have given up waiting
                            let _ = ack.send(());
                        }
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Enqueue a job and return immediately. A dead worker is surfaced at
    /// the next [`Stream::sync`].
    pub fn run(&self, f: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Job::Run(Box::new(f)));
        }
    }

    /// Block until every previously enqueued job has completed.
    pub fn sync(&self) -> Result<(), DeviceError> {
        let tx = self.tx.as_ref().ok_or(DeviceError::StreamDied)?;
        let (ack_tx, ack_rx) = mpsc::channel();
        tx.send(Job::Sync(ack_tx))
            .map_err(|_| DeviceError::StreamDied)?;
        ack_rx.recv().map_err(|_| DeviceError::StreamDied)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_in_submission_order() {
        let stream = Stream::spawn("test-order").unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..100 {
            let log = Arc::clone(&log);
            stream.run(move || log.lock().push(i));
        }
        stream.sync().unwrap();
        assert_eq!(*log.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_sync_waits_for_all_prior_jobs() {
        let stream = Stream::spawn("test-sync").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            stream.run(move || {
                std::thread::sleep(std::time::Duration::from_micros(100));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        stream.sync().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_streams_run_concurrently() {
        let a = Stream::spawn("test-a").unwrap();
        let b = Stream::spawn("test-b").unwrap();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let (tx2, rx2) = std::sync::mpsc::channel::<()>();
        // a waits for b's job to signal, which only works if both run
        a.run(move || {
            tx2.send(()).unwrap();
            rx.recv().unwrap();
        });
        b.run(move || {
            rx2.recv().unwrap();
            tx.send(()).unwrap();
        });
        a.sync().unwrap();
        b.sync().unwrap();
    }
}
