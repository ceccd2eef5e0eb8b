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

//! Elementary clause types of the exchange layer. Clauses are compared
//! commutatively (literal order does not matter for filter equality), which
//! the canonical key types enforce by sorting at construction.

use std::cmp::Ordering;

/// A learned clause as it travels through the sharing machinery. Literals
/// are signed non-zero integers; the variable is the absolute value. The
/// LBD is the engine-reported quality score, always within `[1, size]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clause {
    pub lits: Vec<i32>,
    pub lbd: u32,
}

impl Clause {
    /// Creates a clause, clamping the LBD into its legal range. Unit
    /// clauses always carry an LBD of one.
    pub fn new(lits: Vec<i32>, lbd: u32) -> Self {
        let size = lits.len() as u32;
        let lbd = lbd.clamp(1, size.max(1));
        Clause { lits, lbd }
    }

    pub fn size(&self) -> usize {
        self.lits.len()
    }

    pub fn is_unit(&self) -> bool {
        self.lits.len() == 1
    }

    pub fn is_binary(&self) -> bool {
        self.lits.len() == 2
    }
}

/// The total order used wherever clause streams are merged: shorter first,
/// then better (lower) LBD, then lexicographic on the literals.
pub fn clause_ordering(a: &Clause, b: &Clause) -> Ordering {
    a.size()
        .cmp(&b.size())
        .then(a.lbd.cmp(&b.lbd))
        .then_with(|| a.lits.cmp(&b.lits))
}

/// A clause a local solver wants to export, before it passed the filter.
#[derive(Debug, Clone)]
pub struct ProducedClauseCandidate {
    pub lits: Vec<i32>,
    pub lbd: u32,
    /// Local id of the producing solver thread.
    pub producer: usize,
    /// Sharing epoch at production time.
    pub epoch: u32,
}

impl ProducedClauseCandidate {
    pub fn size(&self) -> usize {
        self.lits.len()
    }
}

// ----------------------------------------------------------------------------
// --- CANONICAL KEYS ---------------------------------------------------------
// ----------------------------------------------------------------------------

/// Canonical key of a unit clause: its single literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitKey(pub i32);

/// Canonical key of a binary clause: the literal pair, sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinaryKey(i32, i32);

impl BinaryKey {
    pub fn new(a: i32, b: i32) -> Self {
        BinaryKey(a.min(b), a.max(b))
    }
}

/// Canonical key of a large clause: length plus the sorted literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LargeKey(Box<[i32]>);

impl LargeKey {
    pub fn new(lits: &[i32]) -> Self {
        let mut sorted: Box<[i32]> = lits.into();
        sorted.sort_unstable();
        LargeKey(sorted)
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_clause {
    use super::*;

    #[test]
    fn lbd_is_clamped_into_its_legal_range() {
        assert_eq!(1, Clause::new(vec![5], 4).lbd);
        assert_eq!(2, Clause::new(vec![1, 2, 3], 0).lbd);
        assert_eq!(3, Clause::new(vec![1, 2, 3], 9).lbd);
    }

    #[test]
    fn ordering_prefers_short_then_low_lbd_then_lex() {
        let a = Clause::new(vec![1, 2], 2);
        let b = Clause::new(vec![1, 2, 3], 2);
        let c = Clause::new(vec![1, 2, 3], 3);
        let d = Clause::new(vec![1, 2, 4], 3);
        assert_eq!(Ordering::Less, clause_ordering(&a, &b));
        assert_eq!(Ordering::Less, clause_ordering(&b, &c));
        assert_eq!(Ordering::Less, clause_ordering(&c, &d));
        assert_eq!(Ordering::Equal, clause_ordering(&c, &c.clone()));
    }

    #[test]
    fn keys_are_commutative() {
        assert_eq!(BinaryKey::new(3, -7), BinaryKey::new(-7, 3));
        assert_eq!(LargeKey::new(&[1, -2, 3]), LargeKey::new(&[-2, 3, 1]));
        assert_ne!(LargeKey::new(&[1, -2, 3]), LargeKey::new(&[1, 2, 3]));
    }
}
