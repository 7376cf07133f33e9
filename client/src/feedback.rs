use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rodio::source::{SineWave, Source};
use rodio::{OutputStream, OutputStreamHandle};
use tracing::warn;

/// Audio cue keyed to a state transition. None of them block the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Draw,
    Win,
    Error,
}

/// (frequency Hz, start offset s, duration s)
type Note = (f32, f32, f32);

const DRAW_TONE: [Note; 1] = [(800.0, 0.0, 0.2)];
const ERROR_TONE: [Note; 1] = [(300.0, 0.0, 0.3)];
/// Victory fanfare: C5 D5 E5 F5 G5 A5 B5, the last notes held longer.
const WIN_FANFARE: [Note; 7] = [
    (523.25, 0.0, 0.2),
    (587.33, 0.2, 0.2),
    (659.25, 0.4, 0.2),
    (698.46, 0.6, 0.2),
    (783.99, 0.8, 0.4),
    (880.0, 1.2, 0.3),
    (987.77, 1.5, 0.5),
];

const AMPLITUDE: f32 = 0.2;

/// Schedules short tone sequences on a dedicated audio thread. Holds no
/// state across calls; cues already queued when the owner goes away may
/// still sound, and callers must not count on their cancellation.
pub struct FeedbackScheduler {
    tx: Option<mpsc::Sender<Cue>>,
}

impl FeedbackScheduler {
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel::<Cue>();
        thread::spawn(move || {
            // The stream handle must outlive every queued source.
            let (_stream, handle) = match OutputStream::try_default() {
                Ok(output) => output,
                Err(err) => {
                    warn!(%err, "no audio device; feedback cues disabled");
                    return;
                }
            };
            while let Ok(cue) = rx.recv() {
                let notes: &[Note] = match cue {
                    Cue::Draw => &DRAW_TONE,
                    Cue::Win => &WIN_FANFARE,
                    Cue::Error => &ERROR_TONE,
                };
                play_notes(&handle, notes);
            }
        });
        FeedbackScheduler { tx: Some(tx) }
    }

    /// A scheduler that swallows every cue. For headless use and tests.
    pub fn disabled() -> Self {
        FeedbackScheduler { tx: None }
    }

    pub fn play(&self, cue: Cue) {
        if let Some(tx) = &self.tx {
            // A dead audio thread just means silence.
            let _ = tx.send(cue);
        }
    }
}

/// Queues every note of a sequence at once; the offsets are all relative to
/// the same submission instant, so per-note clock reads cannot drift.
fn play_notes(handle: &OutputStreamHandle, notes: &[Note]) {
    for &(frequency, offset, length) in notes {
        let source = SineWave::new(frequency)
            .take_duration(Duration::from_secs_f32(length))
            .amplify(AMPLITUDE)
            .delay(Duration::from_secs_f32(offset));
        if let Err(err) = handle.play_raw(source) {
            warn!(%err, "failed to queue feedback tone");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_scheduler_accepts_cues() {
        let feedback = FeedbackScheduler::disabled();
        feedback.play(Cue::Draw);
        feedback.play(Cue::Win);
        feedback.play(Cue::Error);
    }

    #[test]
    fn fanfare_offsets_are_gapless_and_ascending() {
        let mut expected_start = 0.0f32;
        let mut last_freq = 0.0f32;
        for &(freq, offset, length) in WIN_FANFARE.iter() {
            assert!((offset - expected_start).abs() < 1e-6);
            assert!(freq > last_freq);
            expected_start = offset + length;
            last_freq = freq;
        }
    }
}
