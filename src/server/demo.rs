// src/server/demo.rs
//! Number guessing game
//!
//! Every guess becomes a `demo.UserGuess` event. Once installed, the game also
//! reveals its target through the periodic `demo.TargetNumber` event.

use crate::instrumentation::catalog::{TARGET_NUMBER, USER_GUESS};
use crate::instrumentation::event::CapturedEvent;
use crate::instrumentation::flight_recorder::FlightRecorder;
use crate::utils::config::DemoConfig;
use crate::utils::errors::Result;
use rand::Rng;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Answer to a guess
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Correct,
    Higher,
    Lower,
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hint::Correct => f.write_str("Correct! You've guessed the number."),
            Hint::Higher => f.write_str("Higher!"),
            Hint::Lower => f.write_str("Lower!"),
        }
    }
}

pub struct GuessGame {
    recorder: Arc<FlightRecorder>,
    target: i64,
    deviation_filter: Option<i64>,
    answer_delay: Duration,
}

impl GuessGame {
    /// Game with a random target in `1..=10`
    pub fn new(recorder: Arc<FlightRecorder>) -> Self {
        let target = rand::thread_rng().gen_range(1..=10);
        Self::with_target(recorder, target)
    }

    pub fn with_target(recorder: Arc<FlightRecorder>, target: i64) -> Self {
        Self {
            recorder,
            target,
            deviation_filter: None,
            answer_delay: Duration::ZERO,
        }
    }

    pub fn from_config(recorder: Arc<FlightRecorder>, config: &DemoConfig) -> Self {
        let mut game = match config.target {
            Some(target) => Self::with_target(recorder, target),
            None => Self::new(recorder),
        };
        game.deviation_filter = config.deviation_filter;
        game.answer_delay = config.answer_delay();
        game
    }

    /// Record only guesses deviating from the target by more than `percent`
    pub fn with_deviation_filter(mut self, percent: i64) -> Self {
        self.deviation_filter = Some(percent);
        self
    }

    pub fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    pub fn target(&self) -> i64 {
        self.target
    }

    /// Pause the HTTP layer takes before answering
    pub fn answer_delay(&self) -> Duration {
        self.answer_delay
    }

    /// Register the `demo.TargetNumber` hook so running sessions sample the
    /// target once per period
    pub fn install(&self) -> Result<()> {
        let target = self.target;
        self.recorder
            .add_periodic_hook(TARGET_NUMBER, move || Some(json!({ "targetNumber": target })))
    }

    /// Record the guess if anyone is listening, then answer it.
    ///
    /// May block while a stream queue is full.
    pub fn guess(&self, number: i64) -> Hint {
        if self.recorder.is_enabled(USER_GUESS) {
            let deviation = deviation_percent(number, self.target);
            if self.deviation_filter.map_or(true, |limit| deviation > limit) {
                let event = CapturedEvent::new(
                    USER_GUESS,
                    json!({
                        "guess": number,
                        "deviationPercent": deviation,
                    }),
                )
                .on_current_thread();
                self.recorder.commit(event);
            }
        }

        match number.cmp(&self.target) {
            std::cmp::Ordering::Equal => Hint::Correct,
            std::cmp::Ordering::Less => Hint::Higher,
            std::cmp::Ordering::Greater => Hint::Lower,
        }
    }
}

/// Distance from the target as a whole percentage of the target
fn deviation_percent(guess: i64, target: i64) -> i64 {
    if target == 0 {
        return 0;
    }
    let difference = (target - guess).unsigned_abs() as f64;
    (difference / target.unsigned_abs() as f64 * 100.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::event::Sensitivity;
    use crate::instrumentation::session::{CaptureSession, Recording, SessionMode};
    use parking_lot::Mutex;

    /// Running stream recording that collects the payloads of `kind`
    fn listen(
        hub: &Arc<FlightRecorder>,
        kind: &str,
        sensitivity: Sensitivity,
    ) -> (Arc<Recording>, Arc<Mutex<Vec<serde_json::Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recording = hub.new_recording(1, SessionMode::Stream, "listener");
        recording.enable(kind, sensitivity).unwrap();
        let sink = Arc::clone(&seen);
        recording
            .on_event(Box::new(move |event| sink.lock().push(event.payload.clone())))
            .unwrap();
        recording.start().unwrap();
        (recording, seen)
    }

    #[test]
    fn test_hints() {
        let game = GuessGame::with_target(Arc::new(FlightRecorder::default()), 6);
        assert_eq!(game.guess(6), Hint::Correct);
        assert_eq!(game.guess(2), Hint::Higher);
        assert_eq!(game.guess(9), Hint::Lower);
    }

    #[test]
    fn test_random_target_in_range() {
        for _ in 0..50 {
            let game = GuessGame::new(Arc::new(FlightRecorder::default()));
            assert!((1..=10).contains(&game.target()));
        }
    }

    #[test]
    fn test_deviation_percent() {
        assert_eq!(deviation_percent(5, 5), 0);
        assert_eq!(deviation_percent(2, 8), 75);
        assert_eq!(deviation_percent(10, 4), 150);
        assert_eq!(deviation_percent(3, 0), 0);
    }

    #[tokio::test]
    async fn test_guess_committed_when_enabled() {
        let hub = Arc::new(FlightRecorder::default());
        let game = GuessGame::with_target(Arc::clone(&hub), 4);

        game.guess(1);
        assert_eq!(hub.committed(), 0);

        let (recording, seen) = listen(&hub, USER_GUESS, Sensitivity::Unconditional);

        game.guess(2);
        recording.close();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["guess"], 2);
        assert_eq!(seen[0]["deviationPercent"], 50);
    }

    #[tokio::test]
    async fn test_deviation_filter_skips_close_guesses() {
        let hub = Arc::new(FlightRecorder::default());
        let game = GuessGame::with_target(Arc::clone(&hub), 10).with_deviation_filter(20);
        let (recording, seen) = listen(&hub, USER_GUESS, Sensitivity::Unconditional);

        // 0%, 10%, 20% stay out; 30% and 90% go in
        for number in [10, 9, 8, 7, 1] {
            game.guess(number);
        }
        recording.close();

        let guesses: Vec<i64> = seen.lock().iter().map(|p| p["guess"].as_i64().unwrap()).collect();
        assert_eq!(guesses, vec![7, 1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_installed_target_is_sampled_periodically() {
        let hub = Arc::new(FlightRecorder::default());
        let game = GuessGame::with_target(Arc::clone(&hub), 8);
        game.install().unwrap();

        let (recording, seen) = listen(
            &hub,
            TARGET_NUMBER,
            Sensitivity::Period(Duration::from_millis(20)),
        );
        tokio::time::sleep(Duration::from_millis(150)).await;
        recording.close();

        let seen = seen.lock();
        assert!(seen.len() >= 2, "only {} samples", seen.len());
        assert!(seen.iter().all(|p| p["targetNumber"] == 8));
    }

    #[test]
    fn test_from_config() {
        let hub = Arc::new(FlightRecorder::default());
        let config = DemoConfig {
            target: Some(4),
            deviation_filter: Some(50),
            answer_delay_ms: 12,
        };
        let game = GuessGame::from_config(hub, &config);
        assert_eq!(game.target(), 4);
        assert_eq!(game.deviation_filter, Some(50));
        assert_eq!(game.answer_delay(), Duration::from_millis(12));
    }
}
