use rayon::prelude::*;
use std::ops::Range;

pub const DEFAULT_GRANULARITY: usize = 1000;

/// Fork–join scheduling over the rayon worker pool. Work is submitted as
/// contiguous index ranges of uniform granularity; nothing here ever blocks
/// inside a parallel-for, and nested parallel-fors are not used by the
/// sweeps.
///
/// [`Scheduler::accumulate`] assigns chunks statically to slots and the
/// caller merges slot results in ascending slot order, which makes repeated
/// runs bitwise identical at a fixed thread count and granularity.
#[derive(Clone, Copy)]
pub struct Scheduler {
    granularity: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler {
            granularity: DEFAULT_GRANULARITY,
        }
    }
}

impl Scheduler {
    pub fn new(granularity: usize) -> Self {
        assert!(granularity > 0);
        Scheduler { granularity }
    }

    pub fn thread_count(&self) -> usize {
        rayon::current_num_threads()
    }

    /// Effective chunk size for `n` items: the configured granularity or
    /// `n / threads`, whichever is smaller.
    pub fn chunk_size(&self, n: usize) -> usize {
        usize::max(
            1,
            usize::min(self.granularity, n / self.thread_count().max(1)),
        )
    }

    /// Runs `f` over every index of the range, in chunks.
    pub fn parallel_for(&self, range: Range<usize>, f: impl Fn(usize) + Send + Sync) {
        let n = range.end.saturating_sub(range.start);
        if n == 0 {
            return;
        }
        let chunk = self.chunk_size(n);
        let chunks = n.div_ceil(chunk);
        (0..chunks).into_par_iter().for_each(|c| {
            let from = range.start + c * chunk;
            let to = usize::min(from + chunk, range.end);
            for i in from..to {
                f(i);
            }
        });
    }

    /// Mutable indexed iteration over one slice.
    pub fn parallel_for_each<T: Send>(
        &self,
        data: &mut [T],
        f: impl Fn(usize, &mut T) + Send + Sync,
    ) {
        let n = data.len();
        if n == 0 {
            return;
        }
        let chunk = self.chunk_size(n);
        data.par_chunks_mut(chunk).enumerate().for_each(|(c, items)| {
            let base = c * chunk;
            for (k, item) in items.iter_mut().enumerate() {
                f(base + k, item);
            }
        });
    }

    /// Mutable indexed iteration over two equally long slices.
    pub fn parallel_for_each2<T1: Send, T2: Send>(
        &self,
        a: &mut [T1],
        b: &mut [T2],
        f: impl Fn(usize, &mut T1, &mut T2) + Send + Sync,
    ) {
        assert_eq!(a.len(), b.len());
        let n = a.len();
        if n == 0 {
            return;
        }
        let chunk = self.chunk_size(n);
        a.par_chunks_mut(chunk)
            .zip(b.par_chunks_mut(chunk))
            .enumerate()
            .for_each(|(c, (items_a, items_b))| {
                let base = c * chunk;
                for (k, (ia, ib)) in items_a.iter_mut().zip(items_b.iter_mut()).enumerate() {
                    f(base + k, ia, ib);
                }
            });
    }

    /// Number of accumulator slots of a sweep; one per pool thread.
    pub fn slot_count(&self) -> usize {
        self.thread_count().max(1)
    }

    /// Index sub-range owned by a slot.
    pub fn slot_range(&self, slot: usize, n: usize) -> Range<usize> {
        let slots = self.slot_count();
        (n * slot) / slots..(n * (slot + 1)) / slots
    }

    /// Static-partition sweep: slot `s` processes its sub-range of `0..n`
    /// sequentially into its own accumulator. The returned accumulators are
    /// in slot order; reduce them in that order for deterministic results.
    pub fn accumulate<A: Send>(
        &self,
        n: usize,
        make: impl Fn() -> A + Send + Sync,
        process: impl Fn(usize, &mut A) + Send + Sync,
    ) -> Vec<A> {
        let slots = self.slot_count();
        (0..slots)
            .into_par_iter()
            .map(|slot| {
                let mut acc = make();
                for i in self.slot_range(slot, n) {
                    process(i, &mut acc);
                }
                acc
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floating_type_mod::FT;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parallel_for_visits_every_index_once() {
        let scheduler = Scheduler::new(7);
        let counter = AtomicUsize::new(0);
        scheduler.parallel_for(0..1000, |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(counter.into_inner(), 1000);
    }

    #[test]
    fn for_each_indexes_match_elements() {
        let scheduler = Scheduler::default();
        let mut data: Vec<usize> = vec![0; 5000];
        scheduler.parallel_for_each(&mut data, |i, x| *x = i);
        for (i, x) in data.iter().enumerate() {
            assert_eq!(i, *x);
        }
    }

    #[test]
    fn slot_ranges_partition_the_index_space() {
        let scheduler = Scheduler::default();
        let n = 12345;
        let mut covered = 0;
        for slot in 0..scheduler.slot_count() {
            let range = scheduler.slot_range(slot, n);
            assert_eq!(range.start, covered);
            covered = range.end;
        }
        assert_eq!(covered, n);
    }

    #[test]
    fn accumulation_is_reproducible() {
        let scheduler = Scheduler::default();
        let n = 20000;
        let run = || -> FT {
            let slots = scheduler.accumulate(
                n,
                || 0. as FT,
                |i, acc| {
                    // a sum that is sensitive to association order
                    *acc += 1. / (1. + i as FT).sqrt();
                },
            );
            // deterministic reduction in slot order
            slots.into_iter().fold(0., |a, b| a + b)
        };
        let first = run();
        for _ in 0..5 {
            assert_eq!(first.to_bits(), run().to_bits());
        }
    }
}
