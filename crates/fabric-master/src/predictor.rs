//! Load predictor: queue-depth feedback control over the container
//! population.
//!
//! Every `step_length` the predictor samples the per-image pending-message
//! counters and derives a rate of change. Sustained growth, or a queue that
//! is deep and not draining, earns an image additional container requests.
//! The policy is deliberately asymmetric: it only grows the population;
//! containers leave the system solely through termination reported from the
//! workers (idle timeout enforced inside the container itself).

use crate::config::PredictorConfig;
use crate::messages::MessagesQueue;
use crate::queue::ContainerQueue;
use crate::shutdown::ShutdownSignal;
use fabric_core::{ContainerRequest, SharedContainer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Per-image sampling state.
#[derive(Debug, Clone, Default)]
pub struct ImageTrack {
    /// Queue depth observed on the previous pass.
    pub previous_depth: u64,
    /// Rate of change in pending messages per second.
    pub roc: f64,
    /// When the last scale-up for this image was issued.
    pub last_start: Option<Instant>,
}

/// One scale-up issued by a predictor pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleDecision {
    /// Image being scaled.
    pub image_name: String,
    /// Containers requested.
    pub increment: usize,
    /// Rate of change that triggered the decision.
    pub roc: f64,
    /// Queue depth at decision time.
    pub queue_depth: u64,
}

/// Synthesizes container requests from message-queue pressure.
pub struct LoadPredictor {
    messages: Arc<MessagesQueue>,
    container_queue: Arc<ContainerQueue>,
    config: PredictorConfig,
    images: HashMap<String, ImageTrack>,
    decisions_issued: u64,
}

impl LoadPredictor {
    /// Creates a predictor reading `messages` and feeding `container_queue`.
    pub fn new(
        config: PredictorConfig,
        messages: Arc<MessagesQueue>,
        container_queue: Arc<ContainerQueue>,
    ) -> Self {
        debug_assert!(!config.step_length.is_zero(), "step length must be positive");
        Self {
            messages,
            container_queue,
            config,
            images: HashMap::new(),
            decisions_issued: 0,
        }
    }

    /// Sampling state for one image, if it has been observed.
    pub fn tracked(&self, image: &str) -> Option<&ImageTrack> {
        self.images.get(image)
    }

    /// Total scale-ups issued since creation.
    pub fn decisions_issued(&self) -> u64 {
        self.decisions_issued
    }

    /// Runs one sampling-and-decision pass at time `now`, returning the
    /// scale-ups issued.
    ///
    /// First every observed image's rate of change is refreshed from the
    /// current snapshot; then each image is checked against the increment
    /// ladder, skipping images scaled up within the last `wait_time`.
    pub fn step(&mut self, now: Instant) -> Vec<ScaleDecision> {
        let snapshot = self.messages.verbose();
        let step_secs = self.config.step_length.as_secs_f64();

        for (image, depth) in &snapshot {
            let track = self.images.entry(image.clone()).or_default();
            track.roc = (*depth as f64 - track.previous_depth as f64) / step_secs;
            track.previous_depth = *depth;
        }

        let mut decisions = Vec::new();
        for (image, track) in &mut self.images {
            if let Some(last_start) = track.last_start {
                if now.duration_since(last_start) < self.config.wait_time {
                    continue;
                }
            }

            let queue_depth = snapshot.get(image).copied().unwrap_or(0);
            let increment = Self::increment_for(&self.config, track.roc, queue_depth);
            if increment == 0 {
                continue;
            }

            for _ in 0..increment {
                self.container_queue
                    .put(SharedContainer::new(ContainerRequest::new(image.clone())));
            }
            track.last_start = Some(now);
            info!(image, increment, roc = track.roc, queue_depth, "scaling up");
            decisions.push(ScaleDecision {
                image_name: image.clone(),
                increment,
                roc: track.roc,
                queue_depth,
            });
        }

        self.decisions_issued += decisions.len() as u64;
        decisions
    }

    /// The increment ladder: strong growth earns the large increment, mild
    /// growth the small one; a queue over the depth limit earns the large
    /// increment unless it is already draining faster than `roc_minimum`.
    fn increment_for(config: &PredictorConfig, roc: f64, queue_depth: u64) -> usize {
        if roc > config.roc_positive_upper {
            config.large_increment
        } else if roc > config.roc_positive_lower {
            config.small_increment
        } else if queue_depth > config.queue_length_limit && roc > config.roc_minimum {
            config.large_increment
        } else if queue_depth > config.queue_length_limit {
            config.small_increment
        } else {
            0
        }
    }

    /// Spawns the sampling loop; exits on `shutdown`.
    pub fn start(mut self, shutdown: &ShutdownSignal) -> JoinHandle<()> {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval(self.config.step_length);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately and would read a zero
            // baseline; consume it so rates are measured over a full step.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.step(Instant::now());
                    }
                    () = shutdown.triggered() => break,
                }
            }
            debug!("predictor loop stopped");
        })
    }
}
