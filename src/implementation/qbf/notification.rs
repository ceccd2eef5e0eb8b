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

//! The notification payload QBF job nodes exchange along their expansion
//! tree: result reports travelling upwards and cancellations travelling
//! downwards both carry the same four integers.

use crate::{Error, JobId, Result};

/// `(root job, depth, child index, result code)`. The receiver matches
/// `root_job_id` and `depth` against its own context before acting, since
/// subscriptions may outlive the job instance they were installed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QbfNotification {
    pub root_job_id: JobId,
    pub depth: i32,
    pub child_idx: i32,
    pub result_code: i32,
}

impl QbfNotification {
    pub fn new(root_job_id: JobId, depth: i32, child_idx: i32, result_code: i32) -> Self {
        QbfNotification { root_job_id, depth, child_idx, result_code }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        for value in [self.root_job_id, self.depth, self.child_idx, self.result_code] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() != 16 {
            return Err(Error::ProtocolViolation(format!(
                "qbf notification of {} bytes",
                data.len()
            )));
        }
        let word = |i: usize| i32::from_le_bytes(data[4 * i..4 * i + 4].try_into().unwrap());
        Ok(QbfNotification {
            root_job_id: word(0),
            depth: word(1),
            child_idx: word(2),
            result_code: word(3),
        })
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_notification {
    use super::*;

    #[test]
    fn serialization_round_trips() {
        let msg = QbfNotification::new(42, 3, 1, 20);
        assert_eq!(msg, QbfNotification::deserialize(&msg.serialize()).unwrap());
    }

    #[test]
    fn wrong_lengths_are_a_protocol_violation() {
        assert!(QbfNotification::deserialize(&[0; 15]).is_err());
        assert!(QbfNotification::deserialize(&[0; 17]).is_err());
    }
}
