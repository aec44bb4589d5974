//! Fixed-capacity ring of recent durations (milliseconds) with a running sum.

#[derive(Debug, Clone)]
pub struct TimingHistory {
    samples: Vec<f64>,
    cap: usize,
    next: usize,
    sum: f64,
}

impl TimingHistory {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self { samples: Vec::with_capacity(cap), cap, next: 0, sum: 0.0 }
    }

    /// Record one sample, evicting the oldest once full.
    pub fn push(&mut self, ms: f64) {
        if self.samples.len() < self.cap {
            self.samples.push(ms);
        } else {
            self.sum -= self.samples[self.next];
            self.samples[self.next] = ms;
        }
        self.sum += ms;
        self.next = (self.next + 1) % self.cap;
    }

    /// Mean of the retained samples; zero when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
