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

//! A compact, serialization-friendly container for one LRAT proof line.
//! Lines are stored as one contiguous byte vector so they can be appended
//! to buffers and shipped between processes without re-encoding:
//!
//! ```plain
//! id: u64 | numLits: i32 | lits: i32 x numLits
//!         | numHints: i32 | hints: u64 x numHints | signs: u8 x numHints
//! ```

use crate::{Error, Result};

/// The structured form of one proof line: the derived clause's id and
/// literals, plus the signed hint ids justifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LratLine {
    pub id: u64,
    pub literals: Vec<i32>,
    /// (hint id, sign); negative hints print with a leading minus.
    pub hints: Vec<(u64, bool)>,
}

/// One proof line in its wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedLratLine {
    data: Vec<u8>,
}

impl SerializedLratLine {
    pub fn from_line(line: &LratLine) -> Self {
        let mut data = Vec::with_capacity(Self::byte_size(line.literals.len(), line.hints.len()));
        data.extend_from_slice(&line.id.to_le_bytes());
        data.extend_from_slice(&(line.literals.len() as i32).to_le_bytes());
        for lit in &line.literals {
            data.extend_from_slice(&lit.to_le_bytes());
        }
        data.extend_from_slice(&(line.hints.len() as i32).to_le_bytes());
        for (hint, _) in &line.hints {
            data.extend_from_slice(&hint.to_le_bytes());
        }
        for (_, sign) in &line.hints {
            data.push(u8::from(*sign));
        }
        SerializedLratLine { data }
    }

    /// Wraps received bytes, validating the framing.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let line = SerializedLratLine { data };
        let malformed = || Error::ProtocolViolation("lrat line framing".into());
        if line.data.len() < 16 {
            return Err(malformed());
        }
        let num_lits = line.num_literals();
        if num_lits < 0 || line.data.len() < Self::hints_pos(num_lits as usize) + 4 {
            return Err(malformed());
        }
        let num_hints = line.num_hints();
        if num_hints < 0
            || line.data.len() != Self::byte_size(num_lits as usize, num_hints as usize)
        {
            return Err(malformed());
        }
        Ok(line)
    }

    pub fn byte_size(num_lits: usize, num_hints: usize) -> usize {
        8 + 4 + 4 * num_lits + 4 + 9 * num_hints
    }

    fn hints_pos(num_lits: usize) -> usize {
        8 + 4 + 4 * num_lits
    }

    pub fn id(&self) -> u64 {
        u64::from_le_bytes(self.data[0..8].try_into().unwrap())
    }

    pub fn num_literals(&self) -> i32 {
        i32::from_le_bytes(self.data[8..12].try_into().unwrap())
    }

    pub fn literals(&self) -> Vec<i32> {
        let n = self.num_literals().max(0) as usize;
        (0..n)
            .map(|i| {
                let at = 12 + 4 * i;
                i32::from_le_bytes(self.data[at..at + 4].try_into().unwrap())
            })
            .collect()
    }

    pub fn num_hints(&self) -> i32 {
        let at = Self::hints_pos(self.num_literals().max(0) as usize);
        i32::from_le_bytes(self.data[at..at + 4].try_into().unwrap())
    }

    pub fn hints(&self) -> Vec<(u64, bool)> {
        let num_lits = self.num_literals().max(0) as usize;
        let n = self.num_hints().max(0) as usize;
        let ids_at = Self::hints_pos(num_lits) + 4;
        let signs_at = ids_at + 8 * n;
        (0..n)
            .map(|i| {
                let at = ids_at + 8 * i;
                let id = u64::from_le_bytes(self.data[at..at + 8].try_into().unwrap());
                (id, self.data[signs_at + i] != 0)
            })
            .collect()
    }

    pub fn to_line(&self) -> LratLine {
        LratLine { id: self.id(), literals: self.literals(), hints: self.hints() }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }

    /// The textual LRAT rendering: `id lits 0 signed-hints 0`.
    pub fn to_text(&self) -> String {
        let mut out = self.id().to_string();
        for lit in self.literals() {
            out.push_str(&format!(" {lit}"));
        }
        out.push_str(" 0 ");
        for (hint, sign) in self.hints() {
            if sign {
                out.push_str(&format!("{hint} "));
            } else {
                out.push_str(&format!("-{hint} "));
            }
        }
        out.push('0');
        out
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################
