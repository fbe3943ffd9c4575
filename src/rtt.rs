use std::collections::VecDeque;

/// Granularity of the min-RTT sample times.
const RTT_SAMPLE_GRANULARITY_US: u64 = 100_000;

/// Minimum over a moving window of time.
///
/// Keeps a deque of `(time, value)` with strictly increasing times and strictly increasing
/// values; a new sample evicts every older sample that is not smaller than it, since those can
/// never be the minimum again. Sample times must not go backwards.
#[derive(Debug)]
pub(crate) struct MovingMin<T> {
    window_us: u64,
    samples: VecDeque<(u64, T)>,
}

impl<T: Copy + PartialOrd> MovingMin<T> {
    pub fn new(window_us: u64) -> Self {
        Self {
            window_us,
            samples: VecDeque::new(),
        }
    }

    /// Add a sample at `when_us` and return the minimum of the window ending there.
    pub fn add(&mut self, when_us: u64, sample: T) -> T {
        self.roll_window(when_us);

        while self.samples.back().is_some_and(|(_, v)| *v >= sample) {
            self.samples.pop_back();
        }

        // An older sample at the same time is smaller, keep that one.
        if self.samples.back().map_or(true, |(t, _)| *t < when_us) {
            self.samples.push_back((when_us, sample));
        }

        self.samples.front().map(|(_, v)| *v).unwrap_or(sample)
    }

    pub fn min(&self) -> Option<T> {
        self.samples.front().map(|(_, v)| *v)
    }

    /// Drop samples at or before `when_us - window`.
    fn roll_window(&mut self, when_us: u64) {
        let Some(start) = when_us.checked_sub(self.window_us) else {
            return;
        };
        while self.samples.front().is_some_and(|(t, _)| *t <= start) {
            self.samples.pop_front();
        }
    }
}

/// Round trip time bookkeeping for the controller.
///
/// All values are milliseconds. `rtt` is the last RTCP derived round trip, `min_rtt` the
/// windowed minimum over both RTCP round trips and the feedback based lower-bound proxy.
#[derive(Debug)]
pub(crate) struct RttTracker {
    rtt: u32,
    min_rtt: MovingMin<u32>,
}

impl RttTracker {
    pub fn new(window_us: u64) -> Self {
        Self {
            rtt: 0,
            min_rtt: MovingMin::new(window_us),
        }
    }

    /// RTT as measured from RTCP sender/receiver reports.
    pub fn update_rtt(&mut self, now_us: u64, rtt_ms: u32) {
        self.rtt = rtt_ms;
        self.add_sample(now_us, rtt_ms);
    }

    /// RTT lower-bound proxy from feedback arrival.
    ///
    /// Zero samples are dropped, they carry no information about the path.
    pub fn add_sample(&mut self, now_us: u64, rtt_ms: u32) {
        if rtt_ms == 0 {
            return;
        }
        let when = now_us / RTT_SAMPLE_GRANULARITY_US * RTT_SAMPLE_GRANULARITY_US;
        let min = self.min_rtt.add(when, rtt_ms);
        trace!(rtt_ms, min, "RTT sample");
        crate::macros::log_rtt!(rtt_ms, min);
    }

    pub fn rtt(&self) -> u32 {
        self.rtt
    }

    pub fn min_rtt(&self) -> Option<u32> {
        self.min_rtt.min()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn moving_min_tracks_window() {
        let mut m = MovingMin::new(300);
        assert_eq!(m.min(), None);

        assert_eq!(m.add(100, 5), 5);
        assert_eq!(m.add(200, 7), 5);
        assert_eq!(m.add(300, 6), 5);
        // 5 falls out of the window
        assert_eq!(m.add(400, 9), 6);
        assert_eq!(m.add(500, 8), 6);
        assert_eq!(m.add(600, 10), 8);
        assert_eq!(m.add(700, 1), 1);
    }

    #[test]
    fn moving_min_keeps_smaller_sample_at_same_time() {
        let mut m = MovingMin::new(1_000);
        assert_eq!(m.add(100, 5), 5);
        assert_eq!(m.add(100, 7), 5);
        assert_eq!(m.add(100, 3), 3);
        assert_eq!(m.min(), Some(3));
    }

    #[test]
    fn moving_min_matches_brute_force() {
        let window = 1_000;
        let mut m = MovingMin::new(window);
        let mut values: Vec<(u64, u32)> = Vec::new();

        let mut x: u32 = 12345;
        let mut now = 0;
        for _ in 0..1000 {
            // xorshift
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            let v = x % 1000;
            now += 1 + (x % 300) as u64;

            values.push((now, v));
            let expected = values
                .iter()
                .filter(|(t, _)| *t + window > now)
                .map(|(_, v)| *v)
                .min();

            assert_eq!(Some(m.add(now, v)), expected);
        }
    }

    #[test]
    fn samples_are_bucketed_and_expire() {
        let mut t = RttTracker::new(1_000_000);
        t.add_sample(0, 0);
        assert_eq!(t.min_rtt(), None);

        t.add_sample(10_000, 40);
        t.update_rtt(50_000, 55);
        assert_eq!(t.rtt(), 55);
        assert_eq!(t.min_rtt(), Some(40));

        t.update_rtt(60_000, 0);
        assert_eq!(t.rtt(), 0);
        assert_eq!(t.min_rtt(), Some(40));

        // Bucketed to 1.0s, which pushes the samples at 0 out of the window.
        t.add_sample(1_099_999, 70);
        assert_eq!(t.min_rtt(), Some(70));
    }
}
