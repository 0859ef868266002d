//! Injectable random draws for probabilistic branching.
//!
//! Simulated dispatch failures and recovery-stage outcomes are decided by
//! comparing a draw from a [`RandomSource`] against a named probability.
//! Production runs use [`ThreadRandom`] or [`SeededRandom`]; tests substitute
//! [`SequenceRandom`] to script exact outcomes.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    /// Next uniform draw in `[0, 1)`.
    fn next_f64(&self) -> f64;

    /// `true` with the given probability.
    fn chance(&self, probability: f64) -> bool {
        self.next_f64() < probability
    }
}

/// Unseeded source backed by the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Reproducible source seeded from a `u64`.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Create a seeded source.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen::<f64>(),
            // A poisoned lock still holds a usable generator
            Err(poisoned) => poisoned.into_inner().gen::<f64>(),
        }
    }
}

/// Scripted source that replays a fixed list of draws.
///
/// Once the script is exhausted every further draw returns `fallback`.
#[derive(Debug)]
pub struct SequenceRandom {
    draws: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl SequenceRandom {
    /// Replay `draws` in order, then return `0.99` forever.
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self::with_fallback(draws, 0.99)
    }

    /// Replay `draws` in order, then return `fallback` forever.
    pub fn with_fallback(draws: impl IntoIterator<Item = f64>, fallback: f64) -> Self {
        Self {
            draws: Mutex::new(draws.into_iter().collect()),
            fallback,
        }
    }

    /// Source that always returns the same value.
    pub fn constant(value: f64) -> Self {
        Self::with_fallback(Vec::new(), value)
    }
}

impl RandomSource for SequenceRandom {
    fn next_f64(&self) -> f64 {
        let next = match self.draws.lock() {
            Ok(mut draws) => draws.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_random_is_reproducible() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        for _ in 0..10 {
            assert_eq!(a.next_f64(), b.next_f64());
        }
    }

    #[test]
    fn test_draws_are_in_unit_interval() {
        let source = SeededRandom::new(7);
        for _ in 0..1000 {
            let draw = source.next_f64();
            assert!((0.0..1.0).contains(&draw));
        }
        let thread = ThreadRandom;
        assert!((0.0..1.0).contains(&thread.next_f64()));
    }

    #[test]
    fn test_sequence_random_replays_then_falls_back() {
        let source = SequenceRandom::new([0.1, 0.8]);
        assert_eq!(source.next_f64(), 0.1);
        assert_eq!(source.next_f64(), 0.8);
        assert_eq!(source.next_f64(), 0.99);
    }

    #[test]
    fn test_chance_compares_against_probability() {
        let source = SequenceRandom::new([0.69, 0.7]);
        assert!(source.chance(0.7));
        assert!(!source.chance(0.7));
        assert!(!SequenceRandom::constant(0.0).chance(0.0));
        assert!(SequenceRandom::constant(0.5).chance(1.0));
    }
}
