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

//! What a client submits: the formula payloads (possibly several
//! revisions), the application kind, priority and resource limits, plus
//! the JSON schema of the submission interface.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, JobId, Result};

/// The application a job belongs to. QBF payloads carry a leading
/// zero-terminated quantifier block before the CNF body.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ApplicationKind {
    Sat,
    Qbf,
}

impl ApplicationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationKind::Sat => "SAT",
            ApplicationKind::Qbf => "QBF",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "SAT" => Ok(ApplicationKind::Sat),
            "QBF" => Ok(ApplicationKind::Qbf),
            other => Err(Error::ProtocolViolation(format!("unknown application {other:?}"))),
        }
    }
}

/// The full description of a job as known to a worker. Formula payloads
/// are sequences of 32-bit signed integers with `0` terminating each
/// clause (and, for QBF, the quantifier block).
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub id: JobId,
    pub application: ApplicationKind,
    /// In (0, 1]; higher priorities receive resources first.
    pub priority: f32,
    pub incremental: bool,
    pub wallclock_limit: Option<Duration>,
    pub cpu_limit: Option<Duration>,
    /// One payload per revision, in revision order.
    pub revisions: Vec<Vec<i32>>,
    pub assumptions: Vec<i32>,
    /// Free-form application configuration handed through the submission.
    pub app_config: BTreeMap<String, String>,
}

impl JobDescription {
    pub fn new(id: JobId, application: ApplicationKind, priority: f32) -> Self {
        JobDescription {
            id,
            application,
            priority,
            incremental: false,
            wallclock_limit: None,
            cpu_limit: None,
            revisions: Vec::new(),
            assumptions: Vec::new(),
            app_config: BTreeMap::new(),
        }
    }

    pub fn revision(&self) -> i32 {
        self.revisions.len() as i32 - 1
    }

    pub fn payload(&self, revision: i32) -> Option<&[i32]> {
        self.revisions.get(revision as usize).map(Vec::as_slice)
    }

    pub fn push_revision(&mut self, payload: Vec<i32>) {
        self.revisions.push(payload);
    }
}

// ----------------------------------------------------------------------------
// --- SUBMISSION JSON --------------------------------------------------------
// ----------------------------------------------------------------------------

/// The JSON body of a job submission. Limits are strings of the form
/// `"<float>s"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub user: String,
    pub name: String,
    pub application: String,
    pub priority: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preloaded_revisions: Vec<i32>,
    #[serde(rename = "wallclock-limit", default, skip_serializing_if = "Option::is_none")]
    pub wallclock_limit: Option<String>,
    #[serde(rename = "cpu-limit", default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configuration: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl JobSubmission {
    /// Validates the submission and turns it into a description under the
    /// given job id.
    pub fn into_description(self, id: JobId) -> Result<JobDescription> {
        if !(self.priority > 0.0 && self.priority <= 1.0) {
            return Err(Error::ProtocolViolation(format!(
                "priority {} outside (0, 1]",
                self.priority
            )));
        }
        let mut description = JobDescription::new(id, ApplicationKind::parse(&self.application)?, self.priority);
        description.incremental = !self.preloaded_revisions.is_empty();
        description.wallclock_limit = self.wallclock_limit.as_deref().map(parse_limit).transpose()?;
        description.cpu_limit = self.cpu_limit.as_deref().map(parse_limit).transpose()?;
        description.app_config = self.configuration;
        Ok(description)
    }
}

/// Parses a `"<float>s"` limit string into a duration.
pub fn parse_limit(s: &str) -> Result<Duration> {
    let trimmed = s.strip_suffix('s').unwrap_or(s);
    let seconds: f64 = trimmed
        .parse()
        .map_err(|_| Error::ProtocolViolation(format!("malformed limit {s:?}")))?;
    if seconds < 0.0 {
        return Err(Error::ProtocolViolation(format!("negative limit {s:?}")));
    }
    Ok(Duration::from_secs_f64(seconds))
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_description {
    use super::*;

    #[test]
    fn submissions_parse_from_their_json_shape() {
        let json = r#"{
            "user": "admin", "name": "mono-job", "application": "SAT",
            "priority": 0.7, "wallclock-limit": "300s",
            "configuration": {"seed": "5"}
        }"#;
        let submission: JobSubmission = serde_json::from_str(json).unwrap();
        let description = submission.into_description(1).unwrap();
        assert_eq!(ApplicationKind::Sat, description.application);
        assert_eq!(Some(Duration::from_secs(300)), description.wallclock_limit);
        assert_eq!(Some(&"5".to_string()), description.app_config.get("seed"));
        assert!(!description.incremental);
    }

    #[test]
    fn out_of_range_priorities_are_rejected() {
        for priority in [0.0, -1.0, 1.5] {
            let submission = JobSubmission {
                user: "u".into(),
                name: "n".into(),
                application: "SAT".into(),
                priority,
                preloaded_revisions: vec![],
                wallclock_limit: None,
                cpu_limit: None,
                configuration: BTreeMap::new(),
                file: None,
            };
            assert!(submission.into_description(1).is_err());
        }
    }

    #[test]
    fn unknown_applications_are_rejected() {
        assert!(ApplicationKind::parse("MAXSAT").is_err());
        assert_eq!(ApplicationKind::Qbf, ApplicationKind::parse("QBF").unwrap());
    }

    #[test]
    fn limit_strings_carry_fractional_seconds() {
        assert_eq!(Duration::from_millis(1500), parse_limit("1.5s").unwrap());
        assert!(parse_limit("fasts").is_err());
        assert!(parse_limit("-3s").is_err());
    }

    #[test]
    fn optional_fields_are_omitted_when_serializing() {
        let submission = JobSubmission {
            user: "u".into(),
            name: "n".into(),
            application: "QBF".into(),
            priority: 1.0,
            preloaded_revisions: vec![0],
            wallclock_limit: None,
            cpu_limit: None,
            configuration: BTreeMap::new(),
            file: None,
        };
        let json = serde_json::to_string(&submission).unwrap();
        assert!(!json.contains("wallclock-limit"));
        assert!(json.contains("preloaded_revisions"));
    }
}
