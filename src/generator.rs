//! Random Jacobian chain generation.
//!
//! Chains are drawn from a seeded [`StdRng`] so batch runs are
//! reproducible: `q + 1` interface dimensions from `size_range` (adjacent
//! elementals share an interface, which keeps the chain composable) and
//! one DAG edge count per elemental from `dag_size_range`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::chain::{Jacobian, JacobianChain};
use crate::config::Config;

pub struct ChainGenerator {
    rng: StdRng,
    size_range: (usize, usize),
    dag_size_range: (usize, usize),
    memory_limit: usize,
    /// `(length, chains still to produce)` per configured length.
    schedule: Vec<(usize, usize)>,
    cursor: usize,
}

impl ChainGenerator {
    pub fn from_config(config: &Config) -> Self {
        ChainGenerator {
            rng: StdRng::seed_from_u64(config.seed),
            size_range: config.size_range,
            dag_size_range: config.dag_size_range,
            memory_limit: config.available_memory,
            schedule: config
                .lengths
                .iter()
                .map(|&length| (length, config.amount))
                .collect(),
            cursor: 0,
        }
    }

    /// Length of the next chain to be produced, `None` once every
    /// configured amount is exhausted.
    pub fn current_length(&self) -> Option<usize> {
        self.schedule[self.cursor..]
            .iter()
            .find(|&&(_, remaining)| remaining > 0)
            .map(|&(length, _)| length)
    }

    /// Generate the next chain, advancing to the next configured length
    /// when the current one is exhausted.
    pub fn next_chain(&mut self) -> Option<JacobianChain> {
        let (length, remaining) = loop {
            let slot = self.schedule.get_mut(self.cursor)?;
            if slot.1 == 0 {
                self.cursor += 1;
                continue;
            }
            break (slot.0, &mut slot.1);
        };
        *remaining -= 1;
        Some(self.generate(length))
    }

    fn generate(&mut self, length: usize) -> JacobianChain {
        let (size_lo, size_hi) = self.size_range;
        let (dag_lo, dag_hi) = self.dag_size_range;

        let interfaces: Vec<usize> = (0..=length)
            .map(|_| self.rng.gen_range(size_lo..=size_hi))
            .collect();

        let elementals: Vec<Jacobian> = (0..length)
            .map(|l| Jacobian {
                m: interfaces[l + 1],
                n: interfaces[l],
                edges_in_dag: self.rng.gen_range(dag_lo..=dag_hi),
                ..Jacobian::default()
            })
            .collect();

        JacobianChain::from_elementals(&elementals, self.memory_limit)
    }
}
