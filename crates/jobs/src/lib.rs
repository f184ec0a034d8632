// crates/jobs/src/lib.rs
//! Job orchestration for the loanminer server.
//!
//! Each submitted applicant profile becomes one invocation of the external
//! mining binary. The supervisor spawns the process, feeds it the eight
//! categorical fields over stdin, and drains its stdout line-by-line into a
//! per-job buffer that clients empty through repeated status polls.

pub mod buffer;
pub mod error;
pub mod handle;
pub mod supervisor;
pub mod types;

pub use error::JobError;
pub use handle::JobHandle;
pub use supervisor::{JobSupervisor, MinerCommand};
pub use types::{ApplicantFields, JobId, PollUpdate};
