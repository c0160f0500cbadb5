use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;
use tracing::{info, warn};

use crate::{
    dream::{
        config::{EngineSettings, RenderConfig},
        engine::DreamEngine,
        progress::{DreamOutcome, ProgressSnapshot},
    },
    error::{DreamError, Result},
};

use super::{signals::WorkerEvent, worker::Worker};

/// Upper bound on how long a stop request waits for the running task.
pub const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs engine setup and renders on worker threads, one task at a time.
pub struct DreamController {
    engine: Arc<Mutex<DreamEngine>>,
    current: Mutex<Option<Worker>>,
    events: Sender<WorkerEvent>,
    stop_timeout: Duration,
}

impl DreamController {
    /// The receiver yields the events of every task started by this controller.
    pub fn new(engine: DreamEngine) -> (Self, Receiver<WorkerEvent>) {
        let (events, receiver) = crossbeam_channel::unbounded();
        let controller = Self {
            engine: Arc::new(Mutex::new(engine)),
            current: Mutex::new(None),
            events,
            stop_timeout: STOP_WAIT_TIMEOUT,
        };
        (controller, receiver)
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn engine(&self) -> Arc<Mutex<DreamEngine>> {
        Arc::clone(&self.engine)
    }

    pub fn is_busy(&self) -> bool {
        self.lock_current().as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Installs a model in the background; returns the task id.
    pub fn load_engine(&self, settings: EngineSettings) -> Result<usize> {
        let mut current = self.lock_current();
        if current.as_ref().is_some_and(|w| !w.is_finished()) {
            return Err(DreamError::Busy);
        }

        let engine = Arc::clone(&self.engine);
        let worker = Worker::spawn("load engine", false, self.events.clone(), move |_| {
            lock_engine(&engine)?.setup(&settings)?;
            Ok(None)
        })?;

        let task_id = worker.task_id();
        info!("loading engine as task {}", task_id);
        *current = Some(worker);
        Ok(task_id)
    }

    /// Stops any running task, then renders `image` in the background; returns the task id.
    pub fn start_dreaming(&self, image: RgbImage, config: RenderConfig) -> Result<usize> {
        let mut current = self.lock_current();
        self.stop_locked(&current)?;

        let engine = Arc::clone(&self.engine);
        let worker = Worker::spawn("dream", true, self.events.clone(), move |signals| {
            let mut engine = lock_engine(&engine)?;
            let progress: &mut dyn FnMut(&ProgressSnapshot) = &mut |snapshot| {
                signals.progress(snapshot.fraction, Some(snapshot.image.clone()));
            };
            let outcome = engine.dream(&image, Some(progress), Some(signals.stop_flag()), &config)?;
            Ok(match outcome {
                DreamOutcome::Completed(image) => Some(image),
                DreamOutcome::Halted => None,
            })
        })?;

        let task_id = worker.task_id();
        info!("dreaming as task {}", task_id);
        *current = Some(worker);
        Ok(task_id)
    }

    /// Requests cancellation of the running task and waits for it to acknowledge.
    pub fn stop_dreaming(&self) -> Result<()> {
        let current = self.lock_current();
        self.stop_locked(&current)
    }

    /// Stop and wait while the caller holds the slot, so nothing can start in between.
    fn stop_locked(&self, current: &MutexGuard<'_, Option<Worker>>) -> Result<()> {
        if let Some(worker) = current.as_ref().filter(|w| !w.is_finished()) {
            worker.stop();
            if !worker.wait_timeout(self.stop_timeout) {
                warn!("task {} did not stop in time", worker.task_id());
                return Err(DreamError::StopTimeout(self.stop_timeout.as_secs()));
            }
        }
        Ok(())
    }

    /// Blocks until the current task, if any, has finished.
    pub fn wait(&self) {
        let signals = self.lock_current().as_ref().map(|w| w.signals().clone());
        if let Some(signals) = signals {
            signals.wait();
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Worker>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Setup and render never share the engine; a second caller is turned away.
fn lock_engine(engine: &Mutex<DreamEngine>) -> Result<MutexGuard<'_, DreamEngine>> {
    match engine.try_lock() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => Err(DreamError::Busy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::registry::ModelRegistry;

    #[test]
    fn engine_lock_rejects_second_user() {
        let engine = Mutex::new(DreamEngine::new(ModelRegistry::new()));
        let _guard = lock_engine(&engine).unwrap();
        assert!(matches!(lock_engine(&engine), Err(DreamError::Busy)));
    }

    #[test]
    fn stop_without_task_is_a_no_op() {
        let (controller, _events) = DreamController::new(DreamEngine::new(ModelRegistry::new()));
        assert!(!controller.is_busy());
        controller.stop_dreaming().unwrap();
    }

    #[test]
    fn failed_setup_reports_unknown_model() {
        let (controller, events) = DreamController::new(DreamEngine::new(ModelRegistry::new()));
        let settings = EngineSettings {
            device: "cpu".to_string(),
            model: "Nope".to_string(),
            layer: "x".to_string(),
            neuron_first: 0,
            neuron_last: 0,
            imagenet_label: None,
            tiled: false,
            weights: None,
        };
        let task_id = controller.load_engine(settings).unwrap();
        controller.wait();

        let finished = events
            .try_iter()
            .find(|e| matches!(e, WorkerEvent::Finished { .. }))
            .unwrap();
        assert_eq!(finished.task_id(), task_id);
        match finished {
            WorkerEvent::Finished {
                outcome: crate::worker::signals::TaskOutcome::Failed(message),
                ..
            } => assert!(message.contains("Nope")),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
