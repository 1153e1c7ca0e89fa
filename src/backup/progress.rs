use std::sync::atomic::{AtomicU8, Ordering};

/// Receives percentage updates in `0..=100` together with a short status line.
pub trait Progress: Send + Sync {
    fn report(&self, percent: u8, message: &str);
}

impl<F: Fn(u8, &str) + Send + Sync> Progress for F {
    fn report(&self, percent: u8, message: &str) {
        self(percent, message)
    }
}

/// Maps an inner `0..=100` progress into the `[start, end]` slice reserved by the caller.
///
/// Reports never go backwards: a late update from a slower worker is clamped to the
/// highest value already forwarded.
pub struct ScaledProgress<'a> {
    inner: &'a dyn Progress,
    start: u8,
    end: u8,
    high_water: AtomicU8,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a dyn Progress, start: u8, end: u8) -> Self {
        let start = start.min(100);
        let end = end.clamp(start, 100);
        Self {
            inner,
            start,
            end,
            high_water: AtomicU8::new(start),
        }
    }

    fn scale(&self, percent: u8) -> u8 {
        let span = u32::from(self.end - self.start);
        let scaled = u32::from(self.start) + span * u32::from(percent.min(100)) / 100;
        scaled as u8
    }
}

impl Progress for ScaledProgress<'_> {
    fn report(&self, percent: u8, message: &str) {
        let scaled = self.scale(percent);
        let previous = self.high_water.fetch_max(scaled, Ordering::SeqCst);
        self.inner.report(scaled.max(previous), message)
    }
}

/// Percentage of `done` over `total`, `100` for an empty workload.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) * 100 / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_scaled_progress_maps_into_range() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: u8, _: &str| seen.lock().unwrap().push(p);
        let scaled = ScaledProgress::new(&sink, 70, 85);

        scaled.report(0, "start");
        scaled.report(50, "half");
        scaled.report(100, "done");

        assert_eq!(*seen.lock().unwrap(), vec![70, 77, 85]);
    }

    #[test]
    fn test_scaled_progress_never_goes_backwards() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: u8, _: &str| seen.lock().unwrap().push(p);
        let scaled = ScaledProgress::new(&sink, 20, 70);

        scaled.report(60, "ahead");
        scaled.report(10, "late");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], seen[1]);
    }

    #[test]
    fn test_scaled_progress_clamps_inverted_range() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: u8, _: &str| seen.lock().unwrap().push(p);
        let scaled = ScaledProgress::new(&sink, 90, 10);
        scaled.report(200, "overflow");
        assert_eq!(*seen.lock().unwrap(), vec![90]);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 0), 100);
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(5, 3), 100);
    }
}
