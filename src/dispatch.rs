//! Serial background execution for classification tasks.
//!
//! One dedicated worker thread outlives individual frames: tasks run one at
//! a time, in submission order, never in parallel. The hand-off is a
//! single-slot channel, not a queue — admission upstream already guarantees
//! at most one outstanding task, and `submit` treats a full slot as the
//! anomaly it would be rather than buffering.

use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct ClassificationDispatcher {
    sender: Option<SyncSender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl ClassificationDispatcher {
    /// Spawn the worker thread. Called once at startup.
    pub fn new() -> Result<Self> {
        let (sender, receiver) = sync_channel::<Task>(1);
        let worker = thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
                log::debug!("inference worker stopped");
            })
            .context("failed to spawn inference worker")?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Hand one task to the worker. Never blocks: a full slot or a stopped
    /// worker is an error for the caller to log.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("dispatcher is shut down"))?;
        match sender.try_send(Box::new(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!(
                "inference worker busy: submission while a task is still pending"
            )),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("inference worker is gone")),
        }
    }
}

impl Drop for ClassificationDispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain its slot and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("inference worker terminated with a panic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn runs_tasks_in_submission_order() {
        let dispatcher = ClassificationDispatcher::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20u32 {
            loop {
                let seen = Arc::clone(&seen);
                match dispatcher.submit(move || seen.lock().unwrap().push(i)) {
                    Ok(()) => break,
                    Err(_) => thread::sleep(Duration::from_millis(1)),
                }
            }
        }

        assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 20));
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn rejects_submission_while_slot_is_full() {
        let dispatcher = ClassificationDispatcher::new().unwrap();
        let (gate_tx, gate_rx) = channel::<()>();

        // First task blocks the worker until the gate opens.
        dispatcher
            .submit(move || {
                let _ = gate_rx.recv();
            })
            .unwrap();

        // Second task may land in the slot (racing worker pick-up); keep
        // submitting until one occupies it, then the next must be rejected.
        let mut parked = false;
        for _ in 0..100 {
            if dispatcher.submit(|| {}).is_err() {
                parked = true;
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(parked, "a submission should eventually find the slot full");

        gate_tx.send(()).unwrap();
    }

    #[test]
    fn drop_joins_the_worker() {
        let dispatcher = ClassificationDispatcher::new().unwrap();
        let done = Arc::new(Mutex::new(false));
        {
            let done = Arc::clone(&done);
            dispatcher
                .submit(move || {
                    thread::sleep(Duration::from_millis(20));
                    *done.lock().unwrap() = true;
                })
                .unwrap();
        }
        drop(dispatcher);
        assert!(*done.lock().unwrap(), "drop must wait for the in-flight task");
    }
}
