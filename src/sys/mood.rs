use std::{collections::VecDeque, thread::JoinHandle, time::Duration};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::{
    camera::FrameSource,
    expression::{ExpressionClassifier, ExpressionLabel},
};

/// The last few labels reported by the sampler, newest at the back.
#[derive(Debug, Clone)]
pub struct MoodWindow {
    labels: VecDeque<ExpressionLabel>,
    capacity: usize,
}

impl MoodWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            labels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, label: ExpressionLabel) {
        if self.labels.len() == self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(label);
    }

    pub fn latest(&self) -> ExpressionLabel {
        self.labels
            .back()
            .copied()
            .unwrap_or(ExpressionLabel::Unknown)
    }

    pub fn iter(&self) -> impl Iterator<Item = ExpressionLabel> + '_ {
        self.labels.iter().copied()
    }

    /// Newest label first, older ones in parentheses: `happy (neutral, sad)`.
    pub fn summary(&self) -> String {
        let mut labels = self.labels.iter().rev();
        let Some(newest) = labels.next() else {
            return ExpressionLabel::Unknown.to_string();
        };
        let older = labels.map(|l| l.to_string()).collect::<Vec<_>>();
        if older.is_empty() {
            newest.to_string()
        } else {
            format!("{newest} ({})", older.join(", "))
        }
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Background thread that captures and classifies a frame every `interval`.
///
/// Stopping never waits on the thread: a capture in flight runs to its own
/// time limit and its label is dropped.
pub struct MoodSampler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MoodSampler {
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        mut classifier: ExpressionClassifier,
        interval: Duration,
        tx: Sender<ExpressionLabel>,
    ) -> Self {
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);

        let handle = std::thread::spawn(move || {
            log::info!("mood sampler started on {}", source.describe());
            loop {
                match source.capture() {
                    Ok(frame) => {
                        let label = classifier.classify(&frame);
                        log::debug!("mood sample: {label}");
                        if stop_rx.try_recv() != Err(TryRecvError::Empty) {
                            break;
                        }
                        if tx.send(label).is_err() {
                            break;
                        }
                    }
                    Err(err) => log::warn!("frame capture failed: {err:#}"),
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
            log::info!("mood sampler stopped");
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.take();
        self.handle.take();
    }
}

impl Drop for MoodSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn mood_channel() -> (Sender<ExpressionLabel>, Receiver<ExpressionLabel>) {
    crossbeam::channel::unbounded()
}

/// Starts a sampler wired to the given sender, or `None` without a camera.
pub type SamplerFactory =
    Box<dyn FnMut(Sender<ExpressionLabel>) -> anyhow::Result<Option<MoodSampler>>>;

/// The game side of the sampler: one channel that outlives restarts.
pub struct MoodFeed {
    start: SamplerFactory,
    sampler: Option<MoodSampler>,
    tx: Sender<ExpressionLabel>,
    rx: Receiver<ExpressionLabel>,
}

impl MoodFeed {
    pub fn new(start: SamplerFactory) -> Self {
        let (tx, rx) = mood_channel();
        Self {
            start,
            sampler: None,
            tx,
            rx,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Box::new(|_| -> anyhow::Result<Option<MoodSampler>> { Ok(None) }))
    }

    pub fn is_running(&self) -> bool {
        self.sampler.is_some()
    }

    /// Stop the running sampler, then start a fresh one when `enabled`.
    pub fn set_enabled(&mut self, enabled: bool) {
        if let Some(mut sampler) = self.sampler.take() {
            sampler.stop();
        }
        if !enabled {
            while self.rx.try_recv().is_ok() {}
            return;
        }
        match (self.start)(self.tx.clone()) {
            Ok(sampler) => self.sampler = sampler,
            Err(err) => log::warn!("camera unavailable: {err:#}"),
        }
    }

    pub fn drain(&self) -> Vec<ExpressionLabel> {
        self.rx.try_iter().collect()
    }
}
