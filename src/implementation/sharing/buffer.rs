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

//! The serialized clause buffer format exchanged along the job tree. A
//! buffer is a flat `i32` sequence of slot blocks, each block being a
//! three-word header `[size, lbd, count]` followed by `count * size`
//! literals. Blocks appear in (size asc, lbd asc) order, clauses within a
//! block in the order the producer emitted them.

use log::warn;

use crate::Clause;

// ----------------------------------------------------------------------------
// --- BUILDER ----------------------------------------------------------------
// ----------------------------------------------------------------------------
/// Serializes clauses into the buffer format under a fixed word budget.
/// Clauses must be added in nondecreasing (size, lbd) order, which is what
/// every producer (database flush, merger) naturally emits.
pub struct BufferBuilder {
    limit_words: usize,
    out: Vec<i32>,
    current_block: Option<(u32, u32)>,
    count_pos: usize,
    num_clauses: usize,
}

impl BufferBuilder {
    pub fn new(limit_words: usize) -> Self {
        BufferBuilder {
            limit_words,
            out: Vec::new(),
            current_block: None,
            count_pos: 0,
            num_clauses: 0,
        }
    }

    /// An unbounded builder, for excess buffers that roll over.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Appends a clause if the budget allows it. Returns whether the clause
    /// was taken; a refusal leaves the builder untouched.
    pub fn add(&mut self, clause: &Clause) -> bool {
        let key = (clause.size() as u32, clause.lbd);
        debug_assert!(
            self.current_block.map_or(true, |cur| cur <= key),
            "clauses must arrive in nondecreasing (size, lbd) order"
        );
        let new_block = self.current_block != Some(key);
        let needed = clause.size() + if new_block { 3 } else { 0 };
        if self.out.len() + needed > self.limit_words {
            return false;
        }
        if new_block {
            self.out.push(clause.size() as i32);
            self.out.push(clause.lbd as i32);
            self.out.push(0);
            self.count_pos = self.out.len() - 1;
            self.current_block = Some(key);
        }
        self.out.extend_from_slice(&clause.lits);
        self.out[self.count_pos] += 1;
        self.num_clauses += 1;
        true
    }

    pub fn num_clauses(&self) -> usize {
        self.num_clauses
    }

    pub fn len_words(&self) -> usize {
        self.out.len()
    }

    /// Yields the finished buffer.
    pub fn take(self) -> Vec<i32> {
        self.out
    }
}

// ----------------------------------------------------------------------------
// --- READER -----------------------------------------------------------------
// ----------------------------------------------------------------------------
/// Iterates the clauses of a received buffer, validating the framing as it
/// goes. A malformed buffer ends the iteration early; the error sticks to
/// the reader so the caller can discard the sender's contribution.
pub struct BufferReader {
    data: Vec<i32>,
    pos: usize,
    remaining_in_block: usize,
    block_size: usize,
    block_lbd: u32,
    error: Option<String>,
}

impl BufferReader {
    pub fn new(data: Vec<i32>) -> Self {
        BufferReader {
            data,
            pos: 0,
            remaining_in_block: 0,
            block_size: 0,
            block_lbd: 0,
            error: None,
        }
    }

    /// The framing error encountered, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn fail(&mut self, what: &str) -> Option<Clause> {
        warn!("malformed clause buffer at word {}: {what}", self.pos);
        self.error = Some(what.to_string());
        self.pos = self.data.len();
        self.remaining_in_block = 0;
        None
    }
}

impl Iterator for BufferReader {
    type Item = Clause;

    fn next(&mut self) -> Option<Clause> {
        while self.remaining_in_block == 0 {
            if self.error.is_some() || self.pos >= self.data.len() {
                return None;
            }
            if self.pos + 3 > self.data.len() {
                return self.fail("truncated block header");
            }
            let size = self.data[self.pos];
            let lbd = self.data[self.pos + 1];
            let count = self.data[self.pos + 2];
            self.pos += 3;
            if size < 1 || lbd < 1 || lbd > size || count < 0 {
                return self.fail("implausible block header");
            }
            if self.pos + (size as usize) * (count as usize) > self.data.len() {
                return self.fail("block exceeds buffer");
            }
            self.block_size = size as usize;
            self.block_lbd = lbd as u32;
            self.remaining_in_block = count as usize;
        }

        let lits = self.data[self.pos..self.pos + self.block_size].to_vec();
        self.pos += self.block_size;
        self.remaining_in_block -= 1;
        if lits.iter().any(|l| *l == 0) {
            return self.fail("zero literal inside clause");
        }
        Some(Clause { lits, lbd: self.block_lbd })
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
