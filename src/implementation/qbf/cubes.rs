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

//! Cube-and-conquer payloads: a cube is a conjunction of literals that
//! narrows the search space of one worker. Cubes travel as batches under
//! the cube message tags; a worker that proves its cube unsatisfiable
//! returns it as "failed" so the source can prune.

use crate::{Error, Result};

/// A conjunction of assumption literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cube {
    pub lits: Vec<i32>,
}

impl Cube {
    pub fn new(lits: Vec<i32>) -> Self {
        Cube { lits }
    }

    /// The formula extended by this cube's literals as unit clauses.
    pub fn extend_formula(&self, formula: &[i32]) -> Vec<i32> {
        let mut out = Vec::with_capacity(formula.len() + 2 * self.lits.len());
        out.extend_from_slice(formula);
        for lit in &self.lits {
            out.push(*lit);
            out.push(0);
        }
        out
    }
}

/// A worker's request for more cubes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeRequest {
    pub max_cubes: u32,
}

impl CubeRequest {
    pub fn serialize(&self) -> Vec<u8> {
        self.max_cubes.to_le_bytes().to_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let bytes: [u8; 4] = data
            .try_into()
            .map_err(|_| Error::ProtocolViolation("cube request size".into()))?;
        Ok(CubeRequest { max_cubes: u32::from_le_bytes(bytes) })
    }
}

// ----------------------------------------------------------------------------
// --- BATCH WIRE FORMAT ------------------------------------------------------
// ----------------------------------------------------------------------------
// [count: u32][count x {len: u32, len x lit: i32}], little endian. Used by
// both cube shipments and failed-cube returns.

pub fn serialize_cubes(cubes: &[Cube]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(cubes.len() as u32).to_le_bytes());
    for cube in cubes {
        out.extend_from_slice(&(cube.lits.len() as u32).to_le_bytes());
        for lit in &cube.lits {
            out.extend_from_slice(&lit.to_le_bytes());
        }
    }
    out
}

pub fn deserialize_cubes(data: &[u8]) -> Result<Vec<Cube>> {
    let malformed = |what: &str| Error::ProtocolViolation(format!("cube batch: {what}"));
    let mut at = 0;
    let read_u32 = |at: &mut usize| -> Result<u32> {
        let end = *at + 4;
        let bytes = data.get(*at..end).ok_or_else(|| malformed("truncated"))?;
        *at = end;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    };
    let count = read_u32(&mut at)? as usize;
    let mut cubes = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let len = read_u32(&mut at)? as usize;
        let mut lits = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let lit = read_u32(&mut at)? as i32;
            if lit == 0 {
                return Err(malformed("zero literal"));
            }
            lits.push(lit);
        }
        cubes.push(Cube::new(lits));
    }
    if at != data.len() {
        return Err(malformed("trailing bytes"));
    }
    Ok(cubes)
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_cubes {
    use super::*;

    #[test]
    fn batches_round_trip() {
        let cubes = vec![Cube::new(vec![1, -2]), Cube::new(vec![]), Cube::new(vec![3])];
        let back = deserialize_cubes(&serialize_cubes(&cubes)).unwrap();
        assert_eq!(cubes, back);
    }

    #[test]
    fn malformed_batches_are_rejected() {
        let good = serialize_cubes(&[Cube::new(vec![1, 2])]);
        assert!(deserialize_cubes(&good[..good.len() - 1]).is_err());
        let mut trailing = good.clone();
        trailing.push(0);
        assert!(deserialize_cubes(&trailing).is_err());
    }

    #[test]
    fn requests_round_trip() {
        let req = CubeRequest { max_cubes: 8 };
        assert_eq!(req, CubeRequest::deserialize(&req.serialize()).unwrap());
        assert!(CubeRequest::deserialize(&[1, 2]).is_err());
    }

    #[test]
    fn cubes_extend_formulas_as_unit_clauses() {
        let cube = Cube::new(vec![4, -5]);
        assert_eq!(vec![1, 2, 0, 4, 0, -5, 0], cube.extend_formula(&[1, 2, 0]));
    }
}
