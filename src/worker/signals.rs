use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    time::Duration,
};

use crossbeam_channel::Sender;
use image::RgbImage;

use crate::dream::progress::StopFlag;

pub const HALTED_MESSAGE: &str = "the execution was halted before completion";

static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Clone, Debug)]
pub enum TaskOutcome {
    Completed(Option<RgbImage>),
    Halted(String),
    Failed(String),
}

#[derive(Clone, Debug)]
pub enum WorkerEvent {
    Started {
        task_id: usize,
        task_name: String,
        keep_progress: bool,
    },
    Progress {
        task_id: usize,
        fraction: f32,
        image: Option<RgbImage>,
    },
    Stopped {
        task_id: usize,
    },
    Finished {
        task_id: usize,
        outcome: TaskOutcome,
    },
}

impl WorkerEvent {
    pub fn task_id(&self) -> usize {
        match self {
            WorkerEvent::Started { task_id, .. }
            | WorkerEvent::Progress { task_id, .. }
            | WorkerEvent::Stopped { task_id }
            | WorkerEvent::Finished { task_id, .. } => *task_id,
        }
    }
}

/// Shared between a running task and the code that started it.
#[derive(Clone)]
pub struct WorkerSignals {
    task_id: usize,
    stop: StopFlag,
    finished: Arc<(Mutex<bool>, Condvar)>,
    events: Sender<WorkerEvent>,
}

impl WorkerSignals {
    pub fn new(events: Sender<WorkerEvent>) -> Self {
        Self {
            task_id: NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst),
            stop: StopFlag::new(),
            finished: Arc::new((Mutex::new(false), Condvar::new())),
            events,
        }
    }

    pub fn task_id(&self) -> usize {
        self.task_id
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn request_stop(&self) {
        if !self.stop.is_stopped() {
            self.stop.stop();
            self.emit(WorkerEvent::Stopped { task_id: self.task_id });
        }
    }

    pub fn started(&self, task_name: &str, keep_progress: bool) {
        self.emit(WorkerEvent::Started {
            task_id: self.task_id,
            task_name: task_name.to_string(),
            keep_progress,
        });
    }

    pub fn progress(&self, fraction: f32, image: Option<RgbImage>) {
        self.emit(WorkerEvent::Progress {
            task_id: self.task_id,
            fraction,
            image,
        });
    }

    /// Emits the outcome, then wakes every waiter.
    pub fn finish(&self, outcome: TaskOutcome) {
        self.emit(WorkerEvent::Finished {
            task_id: self.task_id,
            outcome,
        });

        let (lock, cvar) = &*self.finished;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.finished;
        let mut finished = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*finished {
            finished = cvar.wait(finished).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// False when the task did not finish within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.finished;
        let finished = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (finished, _) = cvar
            .wait_timeout_while(finished, timeout, |finished| !*finished)
            .unwrap_or_else(PoisonError::into_inner);
        *finished
    }

    // Nobody listening is not an error for the task
    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn task_ids_are_unique() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let a = WorkerSignals::new(tx.clone());
        let b = WorkerSignals::new(tx);
        assert_ne!(a.task_id(), b.task_id());
    }

    #[test]
    fn wait_returns_after_finish() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let signals = WorkerSignals::new(tx);
        let remote = signals.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.finish(TaskOutcome::Completed(None));
        });

        signals.wait();
        assert!(signals.is_finished());
        handle.join().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            WorkerEvent::Finished { outcome: TaskOutcome::Completed(None), .. }
        ));
    }

    #[test]
    fn wait_timeout_expires() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let signals = WorkerSignals::new(tx);
        assert!(!signals.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn stop_is_reported_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let signals = WorkerSignals::new(tx);
        signals.request_stop();
        signals.request_stop();
        assert!(signals.stop_flag().is_stopped());
        assert_eq!(rx.try_iter().count(), 1);
    }
}
