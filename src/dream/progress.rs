use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use image::RgbImage;

/// Minimum time between two intermediate progress snapshots.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ProgressSnapshot {
    pub fraction: f32,
    pub image: RgbImage,
}

/// Cooperative cancellation shared between a render and whoever started it.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Rate-limits snapshots handed to an optional progress callback.
pub struct ProgressReporter<'a> {
    callback: Option<&'a mut dyn FnMut(&ProgressSnapshot)>,
    interval: Duration,
    last_time: Instant,
    last_step: Option<usize>,
    total_steps: usize,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: Option<&'a mut dyn FnMut(&ProgressSnapshot)>, total_steps: usize) -> Self {
        Self {
            callback,
            interval: PROGRESS_INTERVAL,
            last_time: Instant::now(),
            last_step: None,
            total_steps,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// True when a snapshot at this point would be delivered.
    pub fn is_due(&self) -> bool {
        self.callback.is_some() && self.last_time.elapsed() >= self.interval
    }

    pub fn has_reported(&self, step: usize) -> bool {
        self.last_step == Some(step)
    }

    pub fn report(&mut self, fraction: f32, image: RgbImage, step: Option<usize>) {
        if let Some(callback) = self.callback.as_mut() {
            callback(&ProgressSnapshot { fraction, image });
            self.last_time = Instant::now();
            if step.is_some() {
                self.last_step = step;
            }
        }
    }

    /// Reports `step` of `total_steps`, building the image only when a callback is attached.
    pub fn report_step<F>(&mut self, step: usize, image: F) -> crate::error::Result<()>
    where
        F: FnOnce() -> crate::error::Result<RgbImage>,
    {
        if self.callback.is_none() {
            return Ok(());
        }
        let fraction = step as f32 / self.total_steps.max(1) as f32;
        let image = image()?;
        self.report(fraction, image, Some(step));
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum DreamOutcome {
    Completed(RgbImage),
    Halted,
}

impl DreamOutcome {
    pub fn image(&self) -> Option<&RgbImage> {
        match self {
            DreamOutcome::Completed(image) => Some(image),
            DreamOutcome::Halted => None,
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, DreamOutcome::Halted)
    }
}
