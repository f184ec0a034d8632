// crates/jobs/src/supervisor.rs
//! The job supervisor: launches mining processes, tracks them in a registry,
//! and answers status polls.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::error::JobError;
use crate::handle::JobHandle;
use crate::types::{new_job_id, ApplicantFields, JobId, PollUpdate};

/// How to invoke the external mining binary.
#[derive(Debug, Clone)]
pub struct MinerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl MinerCommand {
    /// The production invocation: `<program> <data-file>`.
    pub fn new(program: impl Into<PathBuf>, data_file: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![data_file.into()],
        }
    }

    /// Arbitrary program and argument list, for deployments where the mining
    /// invocation needs more than the single data-file argument (and for
    /// tests, which substitute a shell for the binary).
    pub fn raw(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run a shell snippet instead of the mining binary.
    #[cfg(test)]
    pub(crate) fn shell(script: &str) -> Self {
        Self::raw("sh", ["-c", script])
    }
}

/// Owns the job registry and the mining-binary configuration.
///
/// Thread-safe via `Arc` wrapping; the registry lock is never held across an
/// `.await`. Entries are added by `launch` and removed only by the TTL
/// sweeper — a poll can never observe a partially inserted job.
pub struct JobSupervisor {
    command: MinerCommand,
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
}

impl JobSupervisor {
    pub fn new(command: MinerCommand) -> Self {
        Self {
            command,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn one mining process for the given applicant profile.
    ///
    /// The eight field values are written newline-terminated to the child's
    /// stdin in their fixed positional order, flushed after each write so the
    /// child sees them prompt-by-prompt. The registry entry is inserted only
    /// after the spawn and every write succeeded; on failure the child is
    /// killed and no entry remains.
    pub async fn launch(&self, fields: &ApplicantFields) -> Result<JobId, JobError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                tracing::error!(
                    program = %self.command.program.display(),
                    error = %e,
                    "failed to spawn mining process"
                );
                JobError::SpawnFailed(e)
            })?;

        if let Err(e) = feed_stdin(&mut child, fields).await {
            tracing::error!(error = %e, "failed to feed mining process stdin");
            let _ = child.kill().await;
            return Err(JobError::SpawnFailed(e));
        }

        let stdout = child.stdout.take().ok_or_else(|| {
            JobError::SpawnFailed(std::io::Error::other("failed to capture stdout"))
        })?;

        let id = new_job_id();
        let handle = Arc::new(JobHandle::new(child, stdout));
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(id.clone(), handle);
            }
            Err(e) => {
                tracing::error!("registry lock poisoned on insert: {e}");
                return Err(JobError::SpawnFailed(std::io::Error::other(
                    "job registry unavailable",
                )));
            }
        }

        tracing::info!(job_id = %id, "mining job launched");
        Ok(id)
    }

    /// Answer one status poll.
    ///
    /// Lazily starts the drain worker (the first poll after launch is what
    /// begins draining, not the launch itself), pops at most one buffered
    /// line, and reports completion. A job is completed once its stdout is
    /// fully drained, the child reaped, and the buffer empty after this
    /// call's pop — so every output line reaches the client no later than
    /// the poll that first reports `completed: true`.
    pub fn poll(&self, id: &str) -> Result<PollUpdate, JobError> {
        let handle = self
            .get(id)
            .ok_or_else(|| JobError::UnknownJob(id.to_string()))?;

        Arc::clone(&handle).ensure_draining(id);

        // Read the drained flag before popping: once it is set the worker
        // pushes nothing more, so pop-then-empty-check cannot race.
        let drained = handle.is_drained();
        let msg = handle.buffer().try_pop();
        let completed = drained && handle.buffer().is_empty();

        Ok(PollUpdate {
            id: id.to_string(),
            completed,
            msg,
        })
    }

    /// Remove jobs whose drain finished more than `ttl` ago, and jobs that
    /// were never polled within `ttl` of their launch (their child is killed,
    /// since no drain worker exists to reap it).
    ///
    /// A job with an active drain worker is never evicted, however long its
    /// process runs. Returns the number removed.
    pub fn evict_finished(&self, ttl: Duration) -> usize {
        let mut jobs = match self.jobs.write() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("registry lock poisoned on evict: {e}");
                return 0;
            }
        };
        let before = jobs.len();
        jobs.retain(|id, handle| {
            let expired = match handle.finished_at() {
                Some(finished) => finished.elapsed() >= ttl,
                // finished_at is only ever set by a drain worker; a job no
                // poll ever touched would otherwise sit here forever.
                None => !handle.drain_started() && handle.created_at().elapsed() >= ttl,
            };
            if expired {
                if !handle.drain_started() {
                    handle.abandon(id);
                    tracing::debug!(job_id = %id, "evicting never-polled job");
                } else {
                    tracing::debug!(job_id = %id, "evicting finished job");
                }
            }
            !expired
        });
        before - jobs.len()
    }

    /// Periodically sweep expired jobs. Runs until the supervisor is dropped
    /// by way of the returned task being aborted or the process exiting.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        ttl: Duration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let evicted = supervisor.evict_finished(ttl);
                if evicted > 0 {
                    tracing::info!(evicted, "swept expired jobs");
                }
            }
        })
    }

    /// Number of jobs currently in the registry.
    pub fn job_count(&self) -> usize {
        match self.jobs.read() {
            Ok(jobs) => jobs.len(),
            Err(e) => {
                tracing::error!("registry lock poisoned on count: {e}");
                0
            }
        }
    }

    fn get(&self, id: &str) -> Option<Arc<JobHandle>> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(id).cloned(),
            Err(e) => {
                tracing::error!("registry lock poisoned on lookup: {e}");
                None
            }
        }
    }
}

/// Write the eight field values, newline-terminated and individually flushed,
/// then close stdin (the child reads exactly eight prompts).
async fn feed_stdin(child: &mut Child, fields: &ApplicantFields) -> std::io::Result<()> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("failed to capture stdin"))?;
    for value in fields.as_lines() {
        stdin.write_all(value.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_fields() -> ApplicantFields {
        ApplicantFields {
            gender: "M".into(),
            contract_type: "Cash loans".into(),
            emergency_state: "No".into(),
            education_level: "Higher education".into(),
            income_type: "Working".into(),
            house_type: "block of flats".into(),
            own_car: "Y".into(),
            family_status: "Married".into(),
        }
    }

    // Stand-in miner scripts must consume stdin (`cat >/dev/null`) before
    // exiting, or the launcher's eight flushed writes race the child's exit
    // and fail with a broken pipe, as they would against a real binary that
    // quit without reading its prompts.

    /// Poll until the job completes, collecting every message seen.
    async fn drain_via_polls(sup: &JobSupervisor, id: &str) -> Vec<String> {
        let mut msgs = Vec::new();
        for _ in 0..300 {
            let update = sup.poll(id).expect("job exists");
            if let Some(msg) = update.msg {
                msgs.push(msg);
            }
            if update.completed {
                return msgs;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never completed");
    }

    #[tokio::test]
    async fn test_unknown_job_id() {
        let sup = JobSupervisor::new(MinerCommand::shell("true"));
        let err = sup.poll("no-such-id").unwrap_err();
        assert!(matches!(err, JobError::UnknownJob(id) if id == "no-such-id"));
    }

    #[tokio::test]
    async fn test_launch_returns_unique_resolvable_ids() {
        let sup = JobSupervisor::new(MinerCommand::shell("cat >/dev/null; echo hi"));
        let a = sup.launch(&sample_fields()).await.unwrap();
        let b = sup.launch(&sample_fields()).await.unwrap();
        assert_ne!(a, b);

        // Both ids resolve immediately, before any draining happened.
        assert!(sup.poll(&a).is_ok());
        assert!(sup.poll(&b).is_ok());
        assert_eq!(sup.job_count(), 2);
    }

    #[tokio::test]
    async fn test_child_receives_eight_fields_in_order() {
        // The stand-in process echoes each stdin line back, prefixed, so the
        // drained output proves what arrived and in which order.
        let sup = JobSupervisor::new(MinerCommand::shell(
            r#"while read line; do echo "in:$line"; done"#,
        ));
        let id = sup.launch(&sample_fields()).await.unwrap();
        let msgs = drain_via_polls(&sup, &id).await;

        assert_eq!(
            msgs,
            vec![
                "in:M",
                "in:Cash loans",
                "in:No",
                "in:Higher education",
                "in:Working",
                "in:block of flats",
                "in:Y",
                "in:Married",
            ]
        );
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order_without_gaps() {
        let sup = JobSupervisor::new(MinerCommand::shell(
            "cat >/dev/null; echo step-1; echo step-2; echo step-3",
        ));
        let id = sup.launch(&sample_fields()).await.unwrap();
        let msgs = drain_via_polls(&sup, &id).await;
        assert_eq!(msgs, vec!["step-1", "step-2", "step-3"]);
    }

    #[tokio::test]
    async fn test_last_line_delivered_with_completion() {
        let sup = JobSupervisor::new(MinerCommand::shell(
            "cat >/dev/null; echo a; echo b; echo c",
        ));
        let id = sup.launch(&sample_fields()).await.unwrap();

        // First poll starts the drain worker (and may already see a line).
        let mut updates = vec![sup.poll(&id).unwrap()];
        // Give the child time to write everything and exit.
        tokio::time::sleep(Duration::from_millis(300)).await;

        for _ in 0..300 {
            let update = sup.poll(&id).unwrap();
            let done = update.completed;
            updates.push(update);
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let msgs: Vec<_> = updates.iter().filter_map(|u| u.msg.clone()).collect();
        assert_eq!(msgs, vec!["a", "b", "c"]);
        // Nothing before the final line may claim completion, and the poll
        // returning the final buffered line reports completed together with it.
        for u in &updates[..updates.len() - 1] {
            assert!(!u.completed);
        }
        let last = updates.last().unwrap();
        assert!(last.completed);
        assert_eq!(last.msg.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_exit_with_no_output_completes() {
        // Completion is tied to the drain finishing, not to leftover buffer
        // content, so an output-less exit still completes.
        let sup = JobSupervisor::new(MinerCommand::shell("cat >/dev/null; exit 0"));
        let id = sup.launch(&sample_fields()).await.unwrap();

        let msgs = drain_via_polls(&sup, &id).await;
        assert!(msgs.is_empty());

        let update = sup.poll(&id).unwrap();
        assert!(update.completed);
        assert!(update.msg.is_none());
    }

    #[tokio::test]
    async fn test_poll_before_output_yields_no_msg_not_a_skip() {
        let sup = JobSupervisor::new(MinerCommand::shell(
            "cat >/dev/null; echo early; sleep 0.3; echo late",
        ));
        let id = sup.launch(&sample_fields()).await.unwrap();
        let msgs = drain_via_polls(&sup, &id).await;
        // Polls that land between the two writes return no msg, but no line
        // is ever skipped or reordered.
        assert_eq!(msgs, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_registry_entry() {
        let sup = JobSupervisor::new(MinerCommand::new(
            "/nonexistent/mining-binary",
            "application_data.csv",
        ));
        let err = sup.launch(&sample_fields()).await.unwrap_err();
        assert!(matches!(err, JobError::SpawnFailed(_)));
        assert_eq!(sup.job_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_polls_single_drain_worker() {
        let sup = Arc::new(JobSupervisor::new(MinerCommand::shell(
            "cat >/dev/null; echo only-line",
        )));
        let id = sup.launch(&sample_fields()).await.unwrap();

        // Race many pollers at the same id; with more than one drain worker
        // the single line could be observed twice or lost.
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let sup = Arc::clone(&sup);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                let mut msgs = Vec::new();
                for _ in 0..100 {
                    let update = sup.poll(&id).unwrap();
                    if let Some(m) = update.msg {
                        msgs.push(m);
                    }
                    if update.completed {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                msgs
            }));
        }

        let mut all = Vec::new();
        for t in tasks {
            all.extend(t.await.unwrap());
        }
        assert_eq!(all, vec!["only-line"]);
    }

    #[tokio::test]
    async fn test_eviction_removes_finished_jobs_only() {
        let sup = JobSupervisor::new(MinerCommand::shell("cat >/dev/null; echo bye"));
        let finished = sup.launch(&sample_fields()).await.unwrap();
        drain_via_polls(&sup, &finished).await;

        let running_sup = JobSupervisor::new(MinerCommand::shell("cat >/dev/null; sleep 5"));
        let running = running_sup.launch(&sample_fields()).await.unwrap();
        // Start its drain worker so the job is active, not merely idle.
        let _ = running_sup.poll(&running).unwrap();

        assert_eq!(sup.evict_finished(Duration::ZERO), 1);
        assert!(matches!(
            sup.poll(&finished),
            Err(JobError::UnknownJob(_))
        ));

        // A job still draining is never evicted, whatever the TTL.
        assert_eq!(running_sup.evict_finished(Duration::ZERO), 0);
        assert!(running_sup.poll(&running).is_ok());
    }

    #[tokio::test]
    async fn test_eviction_drops_never_polled_jobs() {
        // A job nobody ever polls has no drain worker, so finished_at never
        // gets set; eviction must age it out from its launch time instead
        // and kill the child.
        let sup = JobSupervisor::new(MinerCommand::shell("cat >/dev/null; sleep 30"));
        let id = sup.launch(&sample_fields()).await.unwrap();

        // Young never-polled jobs are kept.
        assert_eq!(sup.evict_finished(Duration::from_secs(3600)), 0);
        assert_eq!(sup.job_count(), 1);

        assert_eq!(sup.evict_finished(Duration::ZERO), 1);
        assert_eq!(sup.job_count(), 0);
        assert!(matches!(sup.poll(&id), Err(JobError::UnknownJob(_))));
    }

    #[tokio::test]
    async fn test_eviction_drops_never_polled_job_with_exited_child() {
        let sup = JobSupervisor::new(MinerCommand::shell("cat >/dev/null"));
        let id = sup.launch(&sample_fields()).await.unwrap();
        // Let the child consume its stdin and exit; still never polled.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sup.evict_finished(Duration::ZERO), 1);
        assert!(matches!(sup.poll(&id), Err(JobError::UnknownJob(_))));
    }

    #[tokio::test]
    async fn test_eviction_respects_ttl() {
        let sup = JobSupervisor::new(MinerCommand::shell("cat >/dev/null; echo done"));
        let id = sup.launch(&sample_fields()).await.unwrap();
        drain_via_polls(&sup, &id).await;

        assert_eq!(sup.evict_finished(Duration::from_secs(3600)), 0);
        assert!(sup.poll(&id).is_ok());
    }
}
