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

//! The outcome of a job as shipped back to the submitting client.

use serde::{Deserialize, Serialize};

use crate::{JobId, SatResult};

/// Result of one revision of a job. `result` uses the submission
/// interface's codes (0 unknown, 10 sat, 20 unsat); the solution is the
/// model for SAT and the failed assumptions for incremental UNSAT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub id: JobId,
    pub revision: i32,
    pub result: SatResult,
    pub solution: Vec<i32>,
}

impl JobResult {
    pub fn unknown(id: JobId, revision: i32) -> Self {
        JobResult { id, revision, result: SatResult::Unknown, solution: Vec::new() }
    }

    /// The JSON response body for the submission interface. Timeouts
    /// surface as result code 0 with an empty solution.
    pub fn to_response(&self) -> JobResponse {
        JobResponse {
            result: ResponseResult { resultcode: self.result.code() },
            solution: self.solution.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseResult {
    pub resultcode: i32,
}

/// `{"result": {"resultcode": 0|10|20}, "solution": [...]}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobResponse {
    pub result: ResponseResult,
    #[serde(default)]
    pub solution: Vec<i32>,
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_result {
    use super::*;

    #[test]
    fn responses_serialize_with_the_documented_codes() {
        let result = JobResult { id: 1, revision: 0, result: SatResult::Sat, solution: vec![0, 1, -2] };
        let json = serde_json::to_string(&result.to_response()).unwrap();
        assert!(json.contains("\"resultcode\":10"));
        assert!(json.contains("[0,1,-2]"));
    }

    #[test]
    fn a_timeout_is_unknown_with_an_empty_solution() {
        let response = JobResult::unknown(3, 0).to_response();
        assert_eq!(0, response.result.resultcode);
        assert!(response.solution.is_empty());
    }
}
