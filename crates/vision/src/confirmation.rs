//! Temporal confirmation: debounces the per-frame fire signal and arms exactly one
//! alert per confirmed episode.

/// Result of feeding one frame into [`TemporalConfirmation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub counter: u32,
    /// `counter >= threshold` after this frame.
    pub confirmed: bool,
    /// Confirmed on a detection frame and no alert has gone out for this episode yet.
    pub should_alert: bool,
}

/// Hysteretic counter: +1 per detection frame, -1 (floored at zero) per miss.
///
/// Any miss re-arms alerting, even if the counter is still above the threshold. The
/// re-armed alert fires on the next confirmed frame that carries a detection, never on
/// the miss itself.
#[derive(Clone, Debug)]
pub struct TemporalConfirmation {
    threshold: u32,
    counter: u32,
    alert_sent: bool,
}

impl TemporalConfirmation {
    /// `threshold` is clamped to at least one frame.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counter: 0,
            alert_sent: false,
        }
    }

    pub fn observe(&mut self, fire_detected: bool) -> Transition {
        if fire_detected {
            self.counter = self.counter.saturating_add(1);
        } else {
            self.counter = self.counter.saturating_sub(1);
            self.alert_sent = false;
        }

        let confirmed = self.is_confirmed();
        Transition {
            counter: self.counter,
            confirmed,
            should_alert: fire_detected && confirmed && !self.alert_sent,
        }
    }

    /// Record that this episode's alert went out. Ignored while unconfirmed.
    pub fn mark_alerted(&mut self) {
        if self.is_confirmed() {
            self.alert_sent = true;
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.counter >= self.threshold
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn alert_sent(&self) -> bool {
        self.alert_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the machine the way the detection loop does, returning the counter after
    /// each frame and the indices at which an alert was dispatched.
    fn run(threshold: u32, signals: &[bool]) -> (Vec<u32>, Vec<usize>) {
        let mut machine = TemporalConfirmation::new(threshold);
        let mut counters = Vec::new();
        let mut dispatches = Vec::new();
        for (idx, &signal) in signals.iter().enumerate() {
            let transition = machine.observe(signal);
            counters.push(transition.counter);
            if transition.should_alert {
                dispatches.push(idx);
                machine.mark_alerted();
            }
            assert!(!machine.alert_sent() || machine.is_confirmed());
        }
        (counters, dispatches)
    }

    #[test]
    fn confirms_on_fifth_consecutive_detection() {
        let (counters, dispatches) = run(5, &[true; 5]);
        assert_eq!(counters, vec![1, 2, 3, 4, 5]);
        assert_eq!(dispatches, vec![4]);
    }

    #[test]
    fn one_miss_decrements_instead_of_resetting() {
        let signals = [true, true, true, false, true, true, true, true, true];
        let (counters, dispatches) = run(5, &signals);
        assert_eq!(counters, vec![1, 2, 3, 2, 3, 4, 5, 6, 7]);
        assert_eq!(dispatches, vec![6]);
    }

    #[test]
    fn single_dispatch_per_episode() {
        let signals = [false, false, true, true, true, true, true, true, false];
        let (counters, dispatches) = run(5, &signals);
        assert_eq!(counters, vec![0, 0, 1, 2, 3, 4, 5, 6, 5]);
        assert_eq!(dispatches, vec![6]);
    }

    #[test]
    fn sustained_run_after_reset_dispatches_again() {
        let mut signals = vec![true; 6];
        signals.extend([false; 6]);
        signals.extend([true; 5]);
        let (_, dispatches) = run(5, &signals);
        assert_eq!(dispatches, vec![4, 16]);
    }

    #[test]
    fn a_single_miss_while_confirmed_rearms_the_alert() {
        // Counter stays above the threshold through the miss (7 -> 6), yet the next
        // detection starts a fresh episode.
        let mut signals = vec![true; 7];
        signals.push(false);
        signals.push(true);
        let (counters, dispatches) = run(5, &signals);
        assert_eq!(counters[7], 6);
        assert_eq!(dispatches, vec![4, 8]);
    }

    #[test]
    fn a_miss_above_the_threshold_never_dispatches() {
        let mut machine = TemporalConfirmation::new(2);
        for _ in 0..4 {
            machine.observe(true);
        }
        let transition = machine.observe(false);
        assert!(transition.confirmed);
        assert!(!transition.should_alert);
    }

    #[test]
    fn counter_never_negative_and_moves_monotonically() {
        let signals: Vec<bool> = (0..200).map(|i| (i * 7 + i / 3) % 5 < 3).collect();
        let mut machine = TemporalConfirmation::new(5);
        let mut previous = 0;
        for signal in signals {
            let transition = machine.observe(signal);
            if signal {
                assert_eq!(transition.counter, previous + 1);
            } else {
                assert_eq!(transition.counter, previous.saturating_sub(1));
                assert!(!machine.alert_sent());
            }
            previous = transition.counter;
        }
    }

    #[test]
    fn mark_alerted_is_ignored_while_monitoring() {
        let mut machine = TemporalConfirmation::new(3);
        machine.observe(true);
        machine.mark_alerted();
        assert!(!machine.alert_sent());
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let mut machine = TemporalConfirmation::new(0);
        assert_eq!(machine.threshold(), 1);
        assert!(!machine.observe(false).confirmed);
        assert!(machine.observe(true).should_alert);
    }
}
