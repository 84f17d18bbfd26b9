// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Populations of per-cycle delays and sampling without replacement.
//!
//! An in-memory population is sampled by drawing distinct indices. A
//! population on disk is never materialized: it is streamed in chunks and
//! sampled with a reservoir.

use rand::Rng;
use std::path::{Path, PathBuf};

use crate::table::{count_delays, DelayColumnReader, TableError};

/// Rows read per chunk when streaming a delay table.
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// A finite population of delays.
pub trait DelaySource {
    /// Population size.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit the whole population, chunk by chunk, in a fixed order.
    fn for_each_chunk(
        &mut self,
        f: &mut dyn FnMut(&[f64]) -> Result<(), TableError>,
    ) -> Result<(), TableError>;

    /// A simple random sample of `n` delays without replacement. `n` is
    /// clamped to the population size.
    fn sample<R: Rng + ?Sized>(&mut self, n: usize, rng: &mut R) -> Result<Vec<f64>, TableError>;
}

/// Delays held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryDelays {
    delays: Vec<f64>,
}

impl InMemoryDelays {
    pub fn new(delays: Vec<f64>) -> Self {
        InMemoryDelays { delays }
    }

    pub fn delays(&self) -> &[f64] {
        &self.delays
    }
}

impl DelaySource for InMemoryDelays {
    fn len(&self) -> usize {
        self.delays.len()
    }

    fn for_each_chunk(
        &mut self,
        f: &mut dyn FnMut(&[f64]) -> Result<(), TableError>,
    ) -> Result<(), TableError> {
        for chunk in self.delays.chunks(DEFAULT_CHUNK_SIZE) {
            f(chunk)?;
        }
        Ok(())
    }

    fn sample<R: Rng + ?Sized>(&mut self, n: usize, rng: &mut R) -> Result<Vec<f64>, TableError> {
        let n = n.min(self.delays.len());
        Ok(rand::seq::index::sample(rng, self.delays.len(), n)
            .into_iter()
            .map(|i| self.delays[i])
            .collect())
    }
}

/// Fixed-capacity uniform sample of a stream (Algorithm R).
#[derive(Debug, Clone)]
pub struct ReservoirSampler {
    capacity: usize,
    seen: u64,
    reservoir: Vec<f64>,
}

impl ReservoirSampler {
    pub fn new(capacity: usize) -> Self {
        ReservoirSampler {
            capacity,
            seen: 0,
            reservoir: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn offer<R: Rng + ?Sized>(&mut self, value: f64, rng: &mut R) {
        self.seen += 1;
        if self.reservoir.len() < self.capacity {
            self.reservoir.push(value);
            return;
        }
        let j = rng.random_range(0..self.seen);
        if (j as usize) < self.capacity {
            self.reservoir[j as usize] = value;
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn into_sample(self) -> Vec<f64> {
        self.reservoir
    }
}

/// The `delay` column of a cycle-row or scenario table on disk.
#[derive(Debug, Clone)]
pub struct CsvDelaySource {
    path: PathBuf,
    len: usize,
    chunk_size: usize,
}

impl CsvDelaySource {
    /// Open a table and count its delays with one streaming pass.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, TableError> {
        let chunk_size = chunk_size.max(1);
        let len = count_delays(path, chunk_size)?;
        clilog::debug!("{}: {} delays", path.display(), len);
        Ok(CsvDelaySource {
            path: path.to_path_buf(),
            len,
            chunk_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DelaySource for CsvDelaySource {
    fn len(&self) -> usize {
        self.len
    }

    fn for_each_chunk(
        &mut self,
        f: &mut dyn FnMut(&[f64]) -> Result<(), TableError>,
    ) -> Result<(), TableError> {
        let mut rdr = DelayColumnReader::open(&self.path)?;
        let mut buf = Vec::with_capacity(self.chunk_size);
        while rdr.next_chunk(&mut buf, self.chunk_size)? > 0 {
            f(&buf)?;
        }
        Ok(())
    }

    fn sample<R: Rng + ?Sized>(&mut self, n: usize, rng: &mut R) -> Result<Vec<f64>, TableError> {
        let mut reservoir = ReservoirSampler::new(n.min(self.len));
        self.for_each_chunk(&mut |chunk| {
            for &d in chunk {
                reservoir.offer(d, rng);
            }
            Ok(())
        })?;
        Ok(reservoir.into_sample())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_in_memory_sample_is_without_replacement() {
        let mut src = InMemoryDelays::new((0..100).map(|i| i as f64).collect());
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut s = src.sample(30, &mut rng).unwrap();
        assert_eq!(s.len(), 30);
        s.sort_by(|a, b| a.total_cmp(b));
        s.dedup();
        assert_eq!(s.len(), 30);
        assert_eq!(src.sample(500, &mut rng).unwrap().len(), 100);
    }

    #[test]
    fn test_reservoir_keeps_first_items_until_full() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut r = ReservoirSampler::new(4);
        for x in [1., 2., 3.] {
            r.offer(x, &mut rng);
        }
        assert_eq!(r.into_sample(), vec![1., 2., 3.]);
    }

    #[test]
    fn test_reservoir_is_roughly_uniform() {
        // Each of 10 items should land in a 5-slot reservoir about half the time.
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let mut hits = [0u32; 10];
        for _ in 0..4000 {
            let mut r = ReservoirSampler::new(5);
            for i in 0..10 {
                r.offer(i as f64, &mut rng);
            }
            for x in r.into_sample() {
                hits[x as usize] += 1;
            }
        }
        for h in hits {
            assert!((1700..2300).contains(&h), "{:?}", hits);
        }
    }

    #[test]
    fn test_csv_source_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycles.csv");
        let mut text = String::from("a,y,delay\n");
        for i in 0..25 {
            text.push_str(&format!("R,R,{}\n", i));
        }
        std::fs::write(&path, text).unwrap();

        let mut src = CsvDelaySource::open(&path, 4).unwrap();
        assert_eq!(src.len(), 25);
        let mut sum = 0.;
        let mut chunks = 0;
        src.for_each_chunk(&mut |c| {
            assert!(c.len() <= 4);
            chunks += 1;
            sum += c.iter().sum::<f64>();
            Ok(())
        })
        .unwrap();
        assert_eq!(chunks, 7);
        assert_eq!(sum, 300.);

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut s = src.sample(10, &mut rng).unwrap();
        s.sort_by(|a, b| a.total_cmp(b));
        s.dedup();
        assert_eq!(s.len(), 10);
        assert!(s.iter().all(|&x| (0. ..25.).contains(&x)));
    }
}
