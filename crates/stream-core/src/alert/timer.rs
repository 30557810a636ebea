/// Debounce timer of one alert type
///
/// A timer that was never checked is timed out, so the first breach raises
/// its alert right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertTimer {
    delay_ms: u64,
    last_check: Option<u64>,
}

impl AlertTimer {
    /// Create a new timer
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            last_check: None,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Whether `delay_ms` elapsed since the last reset
    ///
    /// With `autoreset` the timer restarts from `now_ms` when it reports a
    /// timeout.
    pub fn is_timeout(&mut self, now_ms: u64, autoreset: bool) -> bool {
        let elapsed = match self.last_check {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.delay_ms,
        };
        if elapsed && autoreset {
            self.last_check = Some(now_ms);
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_check_times_out_then_debounces() {
        let mut timer = AlertTimer::new(5000);
        assert!(timer.is_timeout(0, true));
        assert!(!timer.is_timeout(4000, true));
        assert!(timer.is_timeout(5000, true));
        assert!(!timer.is_timeout(9999, true));
    }

    #[test]
    fn without_autoreset_the_timer_stays_elapsed() {
        let mut timer = AlertTimer::new(100);
        assert!(timer.is_timeout(0, false));
        assert!(timer.is_timeout(1, false));
    }
}
