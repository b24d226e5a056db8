//! Threshold-gated writes.
//!
//! A [`DeltaGate`] remembers the last value written and only lets a new
//! write through once the value has moved by at least the threshold. The
//! timer autosave and the sync push both go through one.

/// Distance between two values of a gated quantity.
pub trait Delta {
    /// Absolute distance between `self` and `other`.
    fn delta(&self, other: &Self) -> u64;
}

impl Delta for u32 {
    fn delta(&self, other: &Self) -> u64 {
        u64::from(self.abs_diff(*other))
    }
}

impl Delta for u64 {
    fn delta(&self, other: &Self) -> u64 {
        self.abs_diff(*other)
    }
}

impl Delta for i64 {
    fn delta(&self, other: &Self) -> u64 {
        self.abs_diff(*other)
    }
}

/// Last written value plus a minimum delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaGate<T> {
    last: Option<T>,
    threshold: u64,
}

impl<T: Delta + Clone> DeltaGate<T> {
    /// Gate with nothing written yet; the first offer always passes.
    pub fn new(threshold: u64) -> Self {
        Self {
            last: None,
            threshold,
        }
    }

    /// Gate that treats `value` as already written.
    pub fn seeded(value: T, threshold: u64) -> Self {
        Self {
            last: Some(value),
            threshold,
        }
    }

    /// Last written value.
    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }

    /// Minimum delta for a write.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether `current` has moved far enough to be written.
    pub fn should_write(&self, current: &T) -> bool {
        match &self.last {
            Some(last) => last.delta(current) >= self.threshold,
            None => true,
        }
    }

    /// Whether `current` differs at all from the last written value. Used for
    /// final flushes, which ignore the threshold.
    pub fn differs(&self, current: &T) -> bool {
        match &self.last {
            Some(last) => last.delta(current) > 0,
            None => true,
        }
    }

    /// Remember `value` as written.
    pub fn record(&mut self, value: T) {
        self.last = Some(value);
    }

    /// Returns the value to write if the gate opens. The caller records it
    /// once the write succeeds.
    pub fn offer(&self, current: &T) -> Option<T> {
        self.should_write(current).then(|| current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_threshold_is_suppressed() {
        let gate = DeltaGate::seeded(600u32, 30);
        assert!(!gate.should_write(&571));
        assert!(gate.should_write(&570));
        assert!(gate.should_write(&630));
    }

    #[test]
    fn test_record_moves_baseline() {
        let mut gate = DeltaGate::seeded(600u32, 30);
        let value = gate.offer(&570).unwrap();
        gate.record(value);
        assert_eq!(gate.last(), Some(&570));
        assert!(gate.offer(&555).is_none());
    }

    #[test]
    fn test_differs_ignores_threshold() {
        let gate = DeltaGate::seeded(100u32, 30);
        assert!(gate.differs(&99));
        assert!(!gate.differs(&100));
        assert!(DeltaGate::<u64>::new(1).differs(&0));
    }

    #[test]
    fn test_generation_gate() {
        let mut gate = DeltaGate::new(1);
        assert!(gate.should_write(&0u64));
        gate.record(3u64);
        assert!(!gate.should_write(&3));
        assert!(gate.should_write(&4));
    }
}
