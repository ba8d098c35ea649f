//! Text encoding of outcomes for transport through the broker.
//!
//! ```text
//! success: <worker_id>|<record as JSON>
//! failure: <worker_id>|<job_id>|<error text>
//! ```
//!
//! Only the first delimiter is significant for a success and only the first two
//! for a failure; whatever follows is carried verbatim. Worker ids never contain
//! `|` (see [`validate_worker_id`](crate::job::validate_worker_id)) and the job id
//! of a failure escapes `%` and `|`, so every field survives a round trip.

use std::collections::BTreeMap;

use crate::error::AppError;
use crate::job::{Outcome, Record};

pub const DELIMITER: char = '|';

/// An outcome tagged with the worker that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub worker_id: String,
    pub outcome: Outcome,
}

impl Report {
    pub fn new(worker_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            worker_id: worker_id.into(),
            outcome,
        }
    }

    pub fn encode(&self) -> Result<String, AppError> {
        match &self.outcome {
            Outcome::Success(record) => {
                let payload = serde_json::to_string(record)?;
                Ok(format!("{}{DELIMITER}{payload}", self.worker_id))
            }
            Outcome::Failure { job_id, reason } => Ok(format!(
                "{}{DELIMITER}{}{DELIMITER}{reason}",
                self.worker_id,
                escape_job(job_id)
            )),
        }
    }

    /// Decode an entry of the results list.
    pub fn decode_success(line: &str) -> Result<Self, AppError> {
        let (worker_id, payload) = split_success(line)?;
        let fields: BTreeMap<String, Option<String>> = serde_json::from_str(payload)
            .map_err(|e| AppError::DecodeError(format!("invalid record payload: {e}")))?;
        let record = Record::from_fields(fields)?;
        Ok(Self::new(worker_id, Outcome::Success(record)))
    }

    /// Decode an entry of the errors list.
    pub fn decode_failure(line: &str) -> Result<Self, AppError> {
        let (worker_id, job_id, reason) = split_failure(line)?;
        Ok(Self::new(worker_id, Outcome::failure(job_id, reason)))
    }
}

/// Split a success line into worker id and serialized payload.
pub fn split_success(line: &str) -> Result<(&str, &str), AppError> {
    let (worker_id, payload) = line.split_once(DELIMITER).ok_or_else(|| {
        AppError::DecodeError(format!("expected 2 fields in result entry: {line:?}"))
    })?;
    if worker_id.is_empty() {
        return Err(AppError::DecodeError("empty worker id".into()));
    }
    Ok((worker_id, payload))
}

/// Split a failure line into worker id, job id and error text.
pub fn split_failure(line: &str) -> Result<(&str, String, &str), AppError> {
    let mut parts = line.splitn(3, DELIMITER);
    let (Some(worker_id), Some(job_id), Some(reason)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(AppError::DecodeError(format!(
            "expected 3 fields in error entry: {line:?}"
        )));
    };
    if worker_id.is_empty() {
        return Err(AppError::DecodeError("empty worker id".into()));
    }
    Ok((worker_id, unescape_job(job_id), reason))
}

fn escape_job(job_id: &str) -> String {
    job_id.replace('%', "%25").replace(DELIMITER, "%7C")
}

fn unescape_job(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("%25") {
            out.push('%');
            rest = &tail[3..];
        } else if tail.starts_with("%7C") || tail.starts_with("%7c") {
            out.push(DELIMITER);
            rest = &tail[3..];
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
