//! Fischer chess clock.
//!
//! Time is read from `tokio::time::Instant`, so tests can pause the runtime
//! clock and step it forward. Every method takes `now` explicitly; the
//! clock never reads the time on its own.

use std::time::Duration;

use kingside_protocol::{ClockView, Color, TimeControl};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Running {
    color: Color,
    since: Instant,
}

/// Two countdown clocks, at most one running.
///
/// Nothing runs until the first [`press`](Self::press): a room waiting for
/// its first move burns nobody's time.
#[derive(Debug, Clone)]
pub struct GameClock {
    remaining: [Duration; 2],
    increment: Duration,
    running: Option<Running>,
}

impl GameClock {
    pub fn new(tc: TimeControl) -> Self {
        let initial = Duration::from_secs(tc.initial_secs);
        Self {
            remaining: [initial, initial],
            increment: Duration::from_secs(tc.increment_secs),
            running: None,
        }
    }

    /// Time left for `color` at `now`, never below zero.
    pub fn remaining(&self, color: Color, now: Instant) -> Duration {
        let banked = self.remaining[color.index()];
        match self.running {
            Some(r) if r.color == color => {
                banked.saturating_sub(now.saturating_duration_since(r.since))
            }
            _ => banked,
        }
    }

    /// `mover` just completed a move: charge the elapsed time, add the
    /// increment, and start the opponent's clock.
    ///
    /// The increment is only granted when the mover's clock was actually
    /// running, so the opening move is free.
    pub fn press(&mut self, mover: Color, now: Instant) {
        let left = self.remaining(mover, now);
        let was_running = matches!(self.running, Some(r) if r.color == mover);
        self.remaining[mover.index()] = if was_running {
            left + self.increment
        } else {
            left
        };
        self.running = Some(Running {
            color: mover.opposite(),
            since: now,
        });
    }

    /// Freezes both clocks.
    pub fn stop(&mut self, now: Instant) {
        if let Some(r) = self.running {
            self.remaining[r.color.index()] = self.remaining(r.color, now);
            self.running = None;
        }
    }

    /// The color whose flag has fallen at `now`, if any.
    pub fn flagged(&self, now: Instant) -> Option<Color> {
        self.running
            .map(|r| r.color)
            .filter(|c| self.remaining(*c, now).is_zero())
    }

    /// When the running clock will reach zero.
    pub fn deadline(&self) -> Option<Instant> {
        self.running
            .map(|r| r.since + self.remaining[r.color.index()])
    }

    pub fn view(&self, now: Instant) -> ClockView {
        let ms = |c| u64::try_from(self.remaining(c, now).as_millis()).unwrap_or(u64::MAX);
        ClockView {
            white_ms: ms(Color::White),
            black_ms: ms(Color::Black),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_clock_idle_until_first_press() {
        let clock = GameClock::new(TimeControl::new(60, 0));
        let later = Instant::now() + secs(3600);
        assert_eq!(clock.remaining(Color::White, later), secs(60));
        assert_eq!(clock.flagged(later), None);
        assert_eq!(clock.deadline(), None);
    }

    #[test]
    fn test_clock_press_charges_mover_and_starts_opponent() {
        let t0 = Instant::now();
        let mut clock = GameClock::new(TimeControl::new(60, 2));

        // Opening move: free, no increment.
        clock.press(Color::White, t0);
        assert_eq!(clock.deadline(), Some(t0 + secs(60)), "black is on move");
        assert_eq!(clock.remaining(Color::White, t0), secs(60));

        // Black thinks for 10s and gets the increment.
        clock.press(Color::Black, t0 + secs(10));
        assert_eq!(clock.remaining(Color::Black, t0 + secs(10)), secs(52));
        assert_eq!(clock.deadline(), Some(t0 + secs(70)), "white is on move");

        // White's clock is now draining.
        assert_eq!(clock.remaining(Color::White, t0 + secs(25)), secs(45));
    }

    #[test]
    fn test_clock_flag_falls_at_deadline() {
        let t0 = Instant::now();
        let mut clock = GameClock::new(TimeControl::new(5, 0));
        clock.press(Color::White, t0);

        assert_eq!(clock.deadline(), Some(t0 + secs(5)));
        assert_eq!(clock.flagged(t0 + secs(4)), None);
        assert_eq!(clock.flagged(t0 + secs(5)), Some(Color::Black));
        assert_eq!(clock.remaining(Color::Black, t0 + secs(9)), Duration::ZERO);
    }

    #[test]
    fn test_clock_stop_freezes_remaining() {
        let t0 = Instant::now();
        let mut clock = GameClock::new(TimeControl::new(60, 0));
        clock.press(Color::White, t0);
        clock.stop(t0 + secs(7));

        assert_eq!(clock.deadline(), None);
        assert_eq!(clock.remaining(Color::Black, t0 + secs(100)), secs(53));
        assert_eq!(clock.flagged(t0 + secs(100)), None);
    }

    #[test]
    fn test_clock_view_in_millis() {
        let t0 = Instant::now();
        let mut clock = GameClock::new(TimeControl::new(1, 0));
        clock.press(Color::White, t0);
        let view = clock.view(t0 + Duration::from_millis(250));
        assert_eq!(view.white_ms, 1000);
        assert_eq!(view.black_ms, 750);
    }
}
