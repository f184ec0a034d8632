// crates/jobs/src/types.rs
//! Types shared across the job subsystem.

use serde::{Deserialize, Serialize};

/// Unique identifier for a job: a UUIDv4 rendered as 32 lowercase hex chars.
///
/// This is the only handle a client ever holds; ids are never reused.
pub type JobId = String;

/// Generate a fresh job id.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The eight categorical applicant fields, in the order the mining binary
/// reads them from stdin. Field declaration order here is load-bearing:
/// `as_lines` iterates it positionally.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct ApplicantFields {
    pub gender: String,
    pub contract_type: String,
    pub emergency_state: String,
    pub education_level: String,
    pub income_type: String,
    pub house_type: String,
    pub own_car: String,
    pub family_status: String,
}

impl ApplicantFields {
    /// Field values in the fixed positional order the mining binary expects.
    pub fn as_lines(&self) -> [&str; 8] {
        [
            &self.gender,
            &self.contract_type,
            &self.emergency_state,
            &self.education_level,
            &self.income_type,
            &self.house_type,
            &self.own_car,
            &self.family_status,
        ]
    }
}

/// One status poll's answer: at most one buffered output line, plus the
/// completion verdict.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct PollUpdate {
    pub id: JobId,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}
