use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    thread,
    time::Duration,
};

use crossbeam_channel::Sender;
use image::RgbImage;
use tracing::{debug, error};

use crate::error::{DreamError, Result};

use super::signals::{TaskOutcome, WorkerEvent, WorkerSignals, HALTED_MESSAGE};

/// A single task running on its own thread.
pub struct Worker {
    task_name: String,
    signals: WorkerSignals,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Starts `job` and reports it through `events`.
    ///
    /// `keep_progress` declares that the task reports progress, which also emits an
    /// initial `Progress` at 0. A job that returns no image after a stop request finishes
    /// as halted.
    pub fn spawn<F>(task_name: &str, keep_progress: bool, events: Sender<WorkerEvent>, job: F) -> Result<Worker>
    where
        F: FnOnce(&WorkerSignals) -> Result<Option<RgbImage>> + Send + 'static,
    {
        let signals = WorkerSignals::new(events);
        let task_signals = signals.clone();
        let name = task_name.to_string();

        let thread = thread::Builder::new()
            .name(format!("worker-{}", signals.task_id()))
            .spawn(move || {
                task_signals.started(&name, keep_progress);
                if keep_progress {
                    task_signals.progress(0.0, None);
                }

                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job(&task_signals))) {
                    Ok(Ok(None)) if task_signals.is_stopped() => TaskOutcome::Halted(HALTED_MESSAGE.to_string()),
                    Ok(Ok(image)) => TaskOutcome::Completed(image),
                    Ok(Err(err)) => {
                        error!(task_id = task_signals.task_id(), "task {} failed: {:?}", name, err);
                        TaskOutcome::Failed(err.short_message())
                    }
                    Err(payload) => {
                        let err = DreamError::WorkerPanicked(panic_message(payload.as_ref()));
                        error!(task_id = task_signals.task_id(), "task {} panicked: {}", name, err);
                        TaskOutcome::Failed(err.short_message())
                    }
                };

                debug!("task {} finished", name);
                task_signals.finish(outcome);
            })?;

        Ok(Worker {
            task_name: task_name.to_string(),
            signals,
            thread: Some(thread),
        })
    }

    pub fn task_id(&self) -> usize {
        self.signals.task_id()
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn signals(&self) -> &WorkerSignals {
        &self.signals
    }

    pub fn is_finished(&self) -> bool {
        self.signals.is_finished()
    }

    pub fn stop(&self) {
        self.signals.request_stop();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.signals.wait_timeout(timeout)
    }

    pub fn join(mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|payload| DreamError::WorkerPanicked(panic_message(payload.as_ref())))?;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<F>(keep_progress: bool, job: F) -> Vec<WorkerEvent>
    where
        F: FnOnce(&WorkerSignals) -> Result<Option<RgbImage>> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = Worker::spawn("test", keep_progress, tx, job).unwrap();
        worker.signals().wait();
        worker.join().unwrap();
        rx.try_iter().collect()
    }

    fn outcome(events: &[WorkerEvent]) -> &TaskOutcome {
        match events.last() {
            Some(WorkerEvent::Finished { outcome, .. }) => outcome,
            other => panic!("expected a finished event, got {:?}", other),
        }
    }

    #[test]
    fn completed_task_reports_result() {
        let events = run(true, |signals| {
            signals.progress(0.5, None);
            Ok(Some(RgbImage::new(3, 2)))
        });
        assert!(matches!(events[0], WorkerEvent::Started { keep_progress: true, .. }));
        assert!(matches!(events[1], WorkerEvent::Progress { fraction, .. } if fraction == 0.0));
        match outcome(&events) {
            TaskOutcome::Completed(Some(image)) => assert_eq!(image.dimensions(), (3, 2)),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn errors_become_short_messages() {
        let events = run(false, |_| Err(DreamError::InvalidArgument("bad\n   input".to_string())));
        assert_eq!(events.len(), 2);
        match outcome(&events) {
            TaskOutcome::Failed(message) => assert_eq!(message, "Invalid argument: bad input"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn panics_are_caught() {
        let events = run(false, |_| panic!("boom"));
        match outcome(&events) {
            TaskOutcome::Failed(message) => assert!(message.contains("boom")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn stopped_task_is_halted() {
        let events = run(false, |signals| {
            signals.request_stop();
            Ok(None)
        });
        assert!(events.iter().any(|e| matches!(e, WorkerEvent::Stopped { .. })));
        match outcome(&events) {
            TaskOutcome::Halted(message) => assert_eq!(message, HALTED_MESSAGE),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
