//! Seeded random number generator for simulation.
//!
//! Same seed, same sequence.

use std::cell::RefCell;

/// xorshift64 generator. Not cryptographic; only reproducible.
pub struct SimRng {
    seed: u64,
    state: RefCell<u64>,
}

impl SimRng {
    /// Seed of 0 becomes 1 (xorshift requires non-zero state).
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 1 } else { seed };
        Self {
            seed,
            state: RefCell::new(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn next_u64(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        *state
    }

    /// Random usize in `[0, max)`; 0 when `max` is 0.
    pub fn next_usize(&self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            (self.next_u64() % max as u64) as usize
        }
    }

    /// Random f64 in `[0.0, 1.0)`.
    pub fn next_f64(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn next_bool(&self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Remove and return a random element.
    pub fn choose_remove<T>(&self, items: &mut Vec<T>) -> Option<T> {
        if items.is_empty() {
            None
        } else {
            let idx = self.next_usize(items.len());
            Some(items.swap_remove(idx))
        }
    }
}
