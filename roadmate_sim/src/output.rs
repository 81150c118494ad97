//! Device output that records every cue against the simulation clock.

use roadmate_env::{Announcement, DeviceOutput, Tone};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::context::SimContext;

/// One recorded cue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OutputEvent {
    Tone { at_ms: u64, tone: Tone },
    Vibrate { at_ms: u64, pattern: Vec<u64> },
    Announce { at_ms: u64, announcement: Announcement },
}

/// Recording device output.
pub struct RecordingOutput {
    ctx: Arc<SimContext>,
    events: Mutex<Vec<OutputEvent>>,
}

impl RecordingOutput {
    pub fn new(ctx: Arc<SimContext>) -> Self {
        Self {
            ctx,
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, event: OutputEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tone_count(&self) -> usize {
        self.count(|e| matches!(e, OutputEvent::Tone { .. }))
    }

    pub fn vibration_count(&self) -> usize {
        self.count(|e| matches!(e, OutputEvent::Vibrate { .. }))
    }

    pub fn announcements(&self) -> Vec<Announcement> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Announce { announcement, .. } => Some(announcement.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of urgent hazard announcements.
    pub fn hazard_count(&self) -> usize {
        self.count(|e| {
            matches!(
                e,
                OutputEvent::Announce {
                    announcement: Announcement::HazardAhead { .. },
                    ..
                }
            )
        })
    }

    fn count(&self, predicate: impl Fn(&OutputEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| predicate(e))
            .count()
    }
}

impl DeviceOutput for RecordingOutput {
    fn play_tone(&self, tone: Tone) {
        self.record(OutputEvent::Tone {
            at_ms: self.ctx.time_ms(),
            tone,
        });
    }

    fn vibrate(&self, pattern: &[u64]) {
        self.record(OutputEvent::Vibrate {
            at_ms: self.ctx.time_ms(),
            pattern: pattern.to_vec(),
        });
    }

    fn announce(&self, announcement: Announcement) {
        self.record(OutputEvent::Announce {
            at_ms: self.ctx.time_ms(),
            announcement,
        });
    }
}
