//! Device output abstraction: tones, vibration and voice.

use crate::types::{Announcement, Tone};

/// Sink for the audible, haptic and spoken cues produced by the core.
///
/// Implementations must return quickly; they are called from timer tasks
/// and from the position-processing path.
pub trait DeviceOutput: Send + Sync + 'static {
    /// Plays a single short tone.
    fn play_tone(&self, tone: Tone);

    /// Runs a vibration pattern (alternating on/off milliseconds).
    fn vibrate(&self, pattern: &[u64]);

    /// Speaks an announcement.
    fn announce(&self, announcement: Announcement);
}

/// Output that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

impl DeviceOutput for NullOutput {
    fn play_tone(&self, _tone: Tone) {}

    fn vibrate(&self, _pattern: &[u64]) {}

    fn announce(&self, _announcement: Announcement) {}
}
