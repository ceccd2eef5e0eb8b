// Copyright 2024 the parsat developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Deterministic k-way merge of clause buffers along the job tree. Interior
//! tree nodes merge their children's buffers with their own under a global
//! byte budget; whatever does not fit is preserved as an "excess" buffer
//! that rolls over into the next sharing epoch.

use std::cmp::Ordering;

use binary_heap_plus::BinaryHeap;
use compare::Compare;
use log::warn;
use rand::Rng;
use rand_xoshiro::SplitMix64;

use crate::{clause_ordering, BufferBuilder, BufferReader, Clause};

/// One clause waiting in the merge heap, remembering which input it came
/// from and its tie-breaking rank.
struct MergeInput {
    clause: Clause,
    source: usize,
    tie_rank: u64,
}

/// Orders the merge heap such that popping yields the globally best clause
/// first: smallest size, then lowest LBD, then lexicographic literals.
/// Ties between equal clauses from different inputs go to the lower rank,
/// which is either the input index (stable insertion order) or a per-input
/// random value for randomized fairness.
struct BestClauseFirst;

impl Compare<MergeInput> for BestClauseFirst {
    fn compare(&self, l: &MergeInput, r: &MergeInput) -> Ordering {
        // Reversed: the max-heap must surface the *smallest* clause.
        clause_ordering(&r.clause, &l.clause)
            .then(r.tie_rank.cmp(&l.tie_rank))
            .then(r.source.cmp(&l.source))
    }
}

/// Merges any number of sorted clause buffers into one, suppressing exact
/// duplicates and respecting a word budget.
pub struct BufferMerger {
    size_limit_words: usize,
    readers: Vec<BufferReader>,
}

impl BufferMerger {
    pub fn new(size_limit_words: usize) -> Self {
        BufferMerger { size_limit_words, readers: Vec::new() }
    }

    pub fn add(&mut self, reader: BufferReader) {
        self.readers.push(reader);
    }

    /// Merges and silently drops everything beyond the budget.
    pub fn merge_discarding_excess(&mut self) -> Vec<i32> {
        self.merge(None, None)
    }

    /// Merges; clauses beyond the budget are serialized into `excess_out`
    /// for the next epoch.
    pub fn merge_preserving_excess(&mut self, excess_out: &mut Vec<i32>) -> Vec<i32> {
        self.merge(Some(excess_out), None)
    }

    /// Like [`Self::merge_preserving_excess`], with ties between inputs
    /// broken by the given epoch-seeded generator instead of input order.
    pub fn merge_preserving_excess_with_random_tie_breaking(
        &mut self,
        excess_out: &mut Vec<i32>,
        rng: &mut SplitMix64,
    ) -> Vec<i32> {
        self.merge(Some(excess_out), Some(rng))
    }

    fn merge(&mut self, excess_out: Option<&mut Vec<i32>>, rng: Option<&mut SplitMix64>) -> Vec<i32> {
        let mut readers = std::mem::take(&mut self.readers);
        let ranks: Vec<u64> = match rng {
            Some(rng) => readers.iter().map(|_| rng.gen()).collect(),
            None => (0..readers.len() as u64).collect(),
        };

        let mut heap = BinaryHeap::from_vec_cmp(Vec::new(), BestClauseFirst);
        for (source, reader) in readers.iter_mut().enumerate() {
            if let Some(clause) = reader.next() {
                heap.push(MergeInput { clause, source, tie_rank: ranks[source] });
            }
        }

        let mut result = BufferBuilder::new(self.size_limit_words);
        let mut excess = BufferBuilder::unbounded();
        let mut overflowed = false;
        let mut last: Option<Clause> = None;

        while let Some(input) = heap.pop() {
            if let Some(clause) = readers[input.source].next() {
                heap.push(MergeInput { clause, source: input.source, tie_rank: ranks[input.source] });
            }

            if last.as_ref() == Some(&input.clause) {
                continue;
            }
            if !overflowed && !result.add(&input.clause) {
                overflowed = true;
            }
            if overflowed {
                excess.add(&input.clause);
            }
            last = Some(input.clause);
        }

        for (source, reader) in readers.iter().enumerate() {
            if let Some(error) = reader.error() {
                warn!("merge input {source} was cut short: {error}");
            }
        }

        if let Some(out) = excess_out {
            *out = excess.take();
        }
        result.take()
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_merger {
    use rand::SeedableRng;
    use rand_xoshiro::SplitMix64;

    use crate::{BufferBuilder, BufferMerger, BufferReader, Clause};

    fn buffer_of(clauses: &[Clause]) -> Vec<i32> {
        let mut b = BufferBuilder::unbounded();
        for c in clauses {
            assert!(b.add(c));
        }
        b.take()
    }

    #[test]
    fn two_sorted_inputs_merge_into_one_sorted_stream() {
        let left = buffer_of(&[Clause::new(vec![1], 1), Clause::new(vec![2, 3, 4], 2)]);
        let right = buffer_of(&[Clause::new(vec![5], 1), Clause::new(vec![1, 2], 2)]);

        let mut merger = BufferMerger::new(1024);
        merger.add(BufferReader::new(left));
        merger.add(BufferReader::new(right));
        let merged: Vec<Clause> = BufferReader::new(merger.merge_discarding_excess()).collect();

        let sizes: Vec<usize> = merged.iter().map(Clause::size).collect();
        assert_eq!(vec![1, 1, 2, 3], sizes);
    }

    #[test]
    fn exact_duplicates_are_suppressed() {
        let a = buffer_of(&[Clause::new(vec![1, 2], 2)]);
        let b = buffer_of(&[Clause::new(vec![1, 2], 2)]);
        let mut merger = BufferMerger::new(1024);
        merger.add(BufferReader::new(a));
        merger.add(BufferReader::new(b));
        let merged: Vec<Clause> = BufferReader::new(merger.merge_discarding_excess()).collect();
        assert_eq!(1, merged.len());
    }

    #[test]
    fn the_overflow_rolls_into_the_excess_buffer() {
        let clauses: Vec<Clause> = (1..=6).map(|v| Clause::new(vec![v, v + 10], 2)).collect();
        let input = buffer_of(&clauses);
        // Header (3) plus three binaries (6).
        let mut merger = BufferMerger::new(9);
        merger.add(BufferReader::new(input));

        let mut excess = Vec::new();
        let merged = merger.merge_preserving_excess(&mut excess);
        assert_eq!(3, BufferReader::new(merged).count());
        assert_eq!(3, BufferReader::new(excess).count());
    }

    #[test]
    fn equal_seeds_produce_equal_merges() {
        let a = buffer_of(&[Clause::new(vec![1, 2], 2), Clause::new(vec![7, 8], 2)]);
        let b = buffer_of(&[Clause::new(vec![3, 4], 2), Clause::new(vec![5, 6], 2)]);

        let run = |seed: u64| {
            let mut merger = BufferMerger::new(1024);
            merger.add(BufferReader::new(a.clone()));
            merger.add(BufferReader::new(b.clone()));
            let mut excess = Vec::new();
            let mut rng = SplitMix64::seed_from_u64(seed);
            merger.merge_preserving_excess_with_random_tie_breaking(&mut excess, &mut rng)
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn a_malformed_input_only_loses_its_own_contribution() {
        let good = buffer_of(&[Clause::new(vec![1, 2], 2)]);
        let bad = vec![2, 9, 1, 3, 4]; // lbd 9 > size 2
        let mut merger = BufferMerger::new(1024);
        merger.add(BufferReader::new(good));
        merger.add(BufferReader::new(bad));
        let merged: Vec<Clause> = BufferReader::new(merger.merge_discarding_excess()).collect();
        assert_eq!(vec![Clause::new(vec![1, 2], 2)], merged);
    }
}
