//! Time wheel (calendar queue) and spike event

use serde::{Deserialize, Serialize};

/// One observed or scheduled spike. `time` is in milliseconds since run start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub neuron_id: u32,
    pub time: u64,
}

/// Calendar queue keyed by millisecond tick.
///
/// Events further away than `wheel_size` ticks share a bucket with nearer ones;
/// `next` only hands out the events whose time has actually come and leaves
/// the rest in place for a later revolution.
pub struct TimeWheel {
    buckets: Vec<Vec<SpikeEvent>>,
    pub current_time: u64,
    wheel_size: u64,
    pending: usize,
}

impl TimeWheel {
    pub fn new(wheel_size: u64) -> Self {
        let wheel_size = wheel_size.max(1);
        let mut buckets = Vec::with_capacity(wheel_size as usize);
        for _ in 0..wheel_size {
            buckets.push(Vec::new());
        }
        Self {
            buckets,
            current_time: 0,
            wheel_size,
            pending: 0,
        }
    }

    /// Schedule an event. Events in the past are moved to the current tick.
    #[inline]
    pub fn schedule(&mut self, mut event: SpikeEvent) {
        if event.time < self.current_time {
            event.time = self.current_time;
        }
        let slot = (event.time % self.wheel_size) as usize;
        self.buckets[slot].push(event);
        self.pending += 1;
    }

    /// Return all events due at the current tick, then advance time by 1 tick.
    pub fn next(&mut self) -> Vec<SpikeEvent> {
        let now = self.current_time;
        let slot = (now % self.wheel_size) as usize;
        let bucket = &mut self.buckets[slot];

        let mut due = Vec::new();
        bucket.retain(|ev| {
            if ev.time == now {
                due.push(*ev);
                false
            } else {
                true
            }
        });
        self.pending -= due.len();
        self.current_time = self.current_time.saturating_add(1);
        due
    }

    /// Number of events still waiting in the wheel.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fire_at_their_tick() {
        let mut wheel = TimeWheel::new(8);
        wheel.schedule(SpikeEvent { neuron_id: 1, time: 2 });
        assert!(wheel.next().is_empty());
        assert!(wheel.next().is_empty());
        let due = wheel.next();
        assert_eq!(due, vec![SpikeEvent { neuron_id: 1, time: 2 }]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn events_beyond_horizon_wait_a_revolution() {
        let mut wheel = TimeWheel::new(4);
        wheel.schedule(SpikeEvent { neuron_id: 0, time: 9 });
        wheel.schedule(SpikeEvent { neuron_id: 3, time: 1 });

        let mut fired = Vec::new();
        for _ in 0..10 {
            for ev in wheel.next() {
                fired.push((ev.neuron_id, ev.time));
            }
        }
        assert_eq!(fired, vec![(3, 1), (0, 9)]);
    }

    #[test]
    fn past_events_fire_on_current_tick() {
        let mut wheel = TimeWheel::new(4);
        wheel.next();
        wheel.next();
        wheel.schedule(SpikeEvent { neuron_id: 5, time: 0 });
        assert_eq!(wheel.pending(), 1);
        let due = wheel.next();
        assert_eq!(due[0].time, 2);
    }
}
