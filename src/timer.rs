use std::sync::{Condvar, Mutex};
use std::time;

/// Fixed-interval alarm which can be stopped from another thread.
///
/// Ticks are scheduled from a fixed origin, so a slow consumer sees the next tick early rather than
/// drifting.
pub struct Ticker {
    interval: time::Duration,
    stopped: Mutex<bool>,
    stop_signal: Condvar,
}

impl Ticker {
    pub fn new(interval: time::Duration) -> Self {
        assert!(!interval.is_zero(), "ticker interval must be nonzero");

        Self {
            interval,
            stopped: Mutex::new(false),
            stop_signal: Condvar::new(),
        }
    }

    pub fn interval(&self) -> time::Duration {
        self.interval
    }

    /// Blocks until `next_tick`, then advances it by one interval. Returns false, possibly early,
    /// once the ticker has been stopped.
    pub fn wait(&self, next_tick: &mut time::Instant) -> bool {
        let mut stopped = self.stopped.lock().unwrap();

        loop {
            if *stopped {
                return false;
            }

            let now = time::Instant::now();

            if now >= *next_tick {
                break;
            }

            stopped = self
                .stop_signal
                .wait_timeout(stopped, *next_tick - now)
                .unwrap()
                .0;
        }

        *next_tick += self.interval;

        // Skip ticks missed entirely rather than firing them back to back
        let now = time::Instant::now();
        if *next_tick < now {
            *next_tick = now + self.interval;
        }

        true
    }

    pub fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        self.stop_signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ticks_at_interval() {
        let ticker = Ticker::new(time::Duration::from_millis(20));

        let t0 = time::Instant::now();
        let mut next_tick = t0 + ticker.interval();

        for _ in 0..3 {
            assert!(ticker.wait(&mut next_tick));
        }

        assert!(t0.elapsed() >= time::Duration::from_millis(60));
    }

    #[test]
    fn stop_interrupts_wait() {
        let ticker = Arc::new(Ticker::new(time::Duration::from_secs(60)));

        let ticker_clone = Arc::clone(&ticker);
        let thread = thread::spawn(move || {
            let mut next_tick = time::Instant::now() + ticker_clone.interval();
            ticker_clone.wait(&mut next_tick)
        });

        thread::sleep(time::Duration::from_millis(50));
        ticker.stop();

        assert_eq!(thread.join().unwrap(), false);

        let mut next_tick = time::Instant::now();
        assert!(!ticker.wait(&mut next_tick));
    }
}
