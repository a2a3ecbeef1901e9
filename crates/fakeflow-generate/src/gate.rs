use std::sync::atomic::{AtomicU64, Ordering};

use crate::random::RandomSource;
use fakeflow_schema::EntityConfig;

/// Per-entity admission: an exact count cap first, then a percent rate.
#[derive(Debug)]
pub struct EntityGate {
    count: u64,
    rate: u8,
    produced: AtomicU64,
}

impl EntityGate {
    /// A gate with neither count nor rate admits every record.
    pub fn new(count: u64, rate: u8) -> Self {
        let rate = if count == 0 && rate == 0 { 100 } else { rate };
        Self {
            count,
            rate: rate.min(100),
            produced: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &EntityConfig) -> Self {
        Self::new(config.count, config.rate)
    }

    pub fn rate(&self) -> u8 {
        self.rate
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    /// Decide whether the current record is produced for this entity.
    pub fn admit(&self, random: &RandomSource) -> bool {
        if self.count > 0
            && self
                .produced
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |produced| {
                    (produced < self.count).then_some(produced + 1)
                })
                .is_ok()
        {
            return true;
        }

        if self.rate > 0 && random.percent() <= self.rate {
            self.produced.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn count_cap_is_exact_under_contention() {
        let gate = Arc::new(EntityGate::new(3, 0));
        let random = Arc::new(RandomSource::from_seed(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let random = Arc::clone(&random);
                thread::spawn(move || (0..100).filter(|_| gate.admit(&random)).count())
            })
            .collect();
        let admitted: usize = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .sum();
        assert_eq!(admitted, 3);
        assert_eq!(gate.produced(), 3);
    }

    #[test]
    fn zero_count_and_rate_admits_everything() {
        let gate = EntityGate::new(0, 0);
        let random = RandomSource::from_seed(1);
        assert_eq!(gate.rate(), 100);
        assert!((0..500).all(|_| gate.admit(&random)));
    }

    #[test]
    fn rate_applies_after_the_cap_is_reached() {
        let gate = EntityGate::new(2, 100);
        let random = RandomSource::from_seed(1);
        assert!((0..10).all(|_| gate.admit(&random)));
        assert_eq!(gate.produced(), 10);
    }

    #[test]
    fn rate_is_roughly_honoured() {
        let gate = EntityGate::new(0, 50);
        let random = RandomSource::from_seed(12);
        let admitted = (0..10_000).filter(|_| gate.admit(&random)).count();
        // percent draws span 0..=100, so rate 50 admits 51/101 of the time
        assert!((4_700..=5_400).contains(&admitted), "admitted {admitted}");
    }
}
