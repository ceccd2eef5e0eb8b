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

//! The one-quantifier expansion step of a QBF job node. A payload starts
//! with its quantifier block (signed variables, positive = existential,
//! negative = universal, terminated by zero) followed by the CNF body;
//! branching over the leading quantifier yields two child payloads with
//! the branch literal appended as a unit clause. Once no quantifier
//! remains, the body is handed to a plain SAT child.

use crate::{ApplicationKind, Error, JobSubmission, QbfContext, QbfNodeType, Result};

/// What to do with a QBF payload at this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitOutcome {
    /// No quantifications left: solve the body as plain SAT.
    PureSat { body: Vec<i32> },
    /// Branch over the leading quantified variable.
    Branch {
        variable: i32,
        node_type: QbfNodeType,
        /// Payload with the variable set true, then set false.
        payloads: [Vec<i32>; 2],
    },
}

/// Number of leading quantifications of the payload.
pub fn num_quantifications(payload: &[i32]) -> usize {
    payload.iter().take_while(|lit| **lit != 0).count()
}

/// Applies the basic splitting strategy to one payload.
pub fn split_formula(payload: &[i32]) -> Result<SplitOutcome> {
    let Some(&quantification) = payload.first() else {
        return Err(Error::ProtocolViolation("empty qbf payload".into()));
    };
    let rest = &payload[1..];
    if quantification == 0 {
        return Ok(SplitOutcome::PureSat { body: rest.to_vec() });
    }

    let variable = quantification.abs();
    let node_type = if quantification > 0 {
        QbfNodeType::Or
    } else {
        QbfNodeType::And
    };
    let with_unit = |lit: i32| {
        let mut child = Vec::with_capacity(rest.len() + 2);
        child.extend_from_slice(rest);
        child.push(lit);
        child.push(0);
        child
    };
    Ok(SplitOutcome::Branch {
        variable,
        node_type,
        payloads: [with_unit(variable), with_unit(-variable)],
    })
}

/// The submission JSON for one child job of a QBF node. The user string
/// encodes the spawning node's identity so its children are attributable
/// in logs and the API.
pub fn child_submission(
    ctx: &QbfContext,
    node_index: usize,
    my_rank: usize,
    child_counter: usize,
    app: ApplicationKind,
    priority: f32,
) -> JobSubmission {
    JobSubmission {
        user: format!("#{}:{}@{}", ctx.node_job_id, node_index, my_rank),
        name: format!("child{child_counter}"),
        application: app.as_str().to_string(),
        priority,
        preloaded_revisions: vec![0],
        wallclock_limit: None,
        cpu_limit: None,
        configuration: Default::default(),
        file: None,
    }
}

/// Convenience for tests and the cube worker: which application a split
/// outcome's children belong to.
pub fn child_application(outcome: &SplitOutcome) -> ApplicationKind {
    match outcome {
        SplitOutcome::PureSat { .. } => ApplicationKind::Sat,
        SplitOutcome::Branch { .. } => ApplicationKind::Qbf,
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_splitting {
    use super::*;

    #[test]
    fn an_existential_quantifier_branches_into_an_or_node() {
        // exists x1, forall x2 : body (x1 or x2)
        let payload = [1, -2, 0, 1, 2, 0];
        let SplitOutcome::Branch { variable, node_type, payloads } =
            split_formula(&payload).unwrap()
        else {
            panic!("expected a branch");
        };
        assert_eq!(1, variable);
        assert_eq!(QbfNodeType::Or, node_type);
        assert_eq!(vec![-2, 0, 1, 2, 0, 1, 0], payloads[0]);
        assert_eq!(vec![-2, 0, 1, 2, 0, -1, 0], payloads[1]);
    }

    #[test]
    fn a_universal_quantifier_branches_into_an_and_node() {
        let payload = [-2, 0, 2, 3, 0];
        let SplitOutcome::Branch { variable, node_type, payloads } =
            split_formula(&payload).unwrap()
        else {
            panic!("expected a branch");
        };
        assert_eq!(2, variable);
        assert_eq!(QbfNodeType::And, node_type);
        assert_eq!(vec![0, 2, 3, 0, 2, 0], payloads[0]);
        assert_eq!(vec![0, 2, 3, 0, -2, 0], payloads[1]);
    }

    #[test]
    fn an_exhausted_prefix_yields_a_pure_sat_child() {
        let payload = [0, 1, 2, 0, -1, 0];
        let outcome = split_formula(&payload).unwrap();
        assert_eq!(SplitOutcome::PureSat { body: vec![1, 2, 0, -1, 0] }, outcome);
        assert_eq!(ApplicationKind::Sat, child_application(&outcome));
    }

    #[test]
    fn repeated_splitting_consumes_the_whole_prefix() {
        // exists x1, forall x2 : (x1 or x2) and (not x1 or not x2)
        let mut payload = vec![1, -2, 0, 1, 2, 0, -1, -2, 0];
        let mut splits = 0;
        loop {
            match split_formula(&payload).unwrap() {
                SplitOutcome::Branch { payloads, .. } => {
                    splits += 1;
                    payload = payloads[0].clone();
                }
                SplitOutcome::PureSat { body } => {
                    assert_eq!(2, splits);
                    // Both branch units were appended to the body.
                    assert!(body.ends_with(&[2, 0]));
                    break;
                }
            }
        }
    }

    #[test]
    fn quantification_counting_stops_at_the_separator() {
        assert_eq!(2, num_quantifications(&[1, -2, 0, 1, 0]));
        assert_eq!(0, num_quantifications(&[0, 1, 0]));
    }
}
