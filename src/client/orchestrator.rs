//! Fans out the configured number of timed requests and joins all of them.
//!
//! Transport failures and deadline expiry stay local to their task and end up
//! in the [`RunReport`]. A metrics log failure voids the whole run: the
//! remaining tasks are cancelled, joined, and the error is returned.

use crate::http::transport::{ExperimentRequest, Transport};
use crate::metrics::{MetricsRecorder, MetricsRow};
use crate::timing::{PhaseDurations, PhaseTimer};
use bytes::Bytes;
use hyper::Uri;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug)]
pub enum TaskOutcome {
    Completed(PhaseDurations),
    TimedOut,
    Failed(String),
}

enum TaskResult {
    Outcome(TaskOutcome),
    Fatal(anyhow::Error),
    Cancelled,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<PhaseDurations>,
    pub timed_out: usize,
    pub failures: Vec<(usize, String)>,
    pub panicked: usize,
}

impl RunReport {
    pub fn requested(&self) -> usize {
        self.completed.len() + self.timed_out + self.failures.len() + self.panicked
    }

    pub fn is_clean(&self) -> bool {
        self.timed_out == 0 && self.failures.is_empty() && self.panicked == 0
    }

    fn push(&mut self, task_id: usize, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed(durations) => self.completed.push(durations),
            TaskOutcome::TimedOut => self.timed_out += 1,
            TaskOutcome::Failed(reason) => self.failures.push((task_id, reason)),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Requests: {} completed, {} failed, {} timed out",
            self.completed.len(),
            self.failures.len() + self.panicked,
            self.timed_out
        )?;
        let totals: Vec<Duration> = self.completed.iter().map(|d| d.total).collect();
        if let (Some(min), Some(max)) = (totals.iter().min(), totals.iter().max()) {
            let mean = totals.iter().sum::<Duration>() / totals.len() as u32;
            writeln!(f, "Total: min {:?}, mean {:?}, max {:?}", min, mean, max)?;
        }
        for (task_id, reason) in &self.failures {
            writeln!(f, "  task {}: {}", task_id, reason)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Experiment {
    pub target: Uri,
    pub body: Bytes,
    pub concurrency: usize,
    pub deadline: Duration,
}

pub struct Orchestrator<T> {
    transport: Arc<T>,
    recorder: Arc<MetricsRecorder>,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(transport: Arc<T>, recorder: Arc<MetricsRecorder>) -> Self {
        Self {
            transport,
            recorder,
        }
    }

    pub async fn run(&self, experiment: &Experiment) -> Result<RunReport, anyhow::Error> {
        ensure!(experiment.concurrency >= 1, "concurrency must be at least 1");
        info!(
            "Sending {} request(s) to {} with a {} byte body",
            experiment.concurrency,
            experiment.target,
            experiment.body.len()
        );

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for task_id in 0..experiment.concurrency {
            let request = ExperimentRequest {
                task_id,
                uri: experiment.target.clone(),
                body: experiment.body.clone(),
            };
            let transport = self.transport.clone();
            let recorder = self.recorder.clone();
            let cancel = cancel.clone();
            let deadline = experiment.deadline;
            tasks.spawn(
                async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => TaskResult::Cancelled,
                        result = run_task(transport.as_ref(), &recorder, request, deadline) => result,
                    };
                    (task_id, result)
                }
                .instrument(info_span!("task", id = task_id)),
            );
        }

        let mut report = RunReport::default();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((task_id, TaskResult::Outcome(outcome))) => report.push(task_id, outcome),
                Ok((_, TaskResult::Fatal(e))) => {
                    error!("Aborting run: {:#}", e);
                    cancel.cancel();
                    fatal.get_or_insert(e);
                }
                Ok((_, TaskResult::Cancelled)) => {}
                Err(e) => {
                    error!("Request task panicked: {}", e);
                    report.panicked += 1;
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

async fn run_task<T: Transport>(
    transport: &T,
    recorder: &MetricsRecorder,
    request: ExperimentRequest,
    deadline: Duration,
) -> TaskResult {
    let mut timer = PhaseTimer::new(request.task_id);
    let response = match timeout(deadline, transport.exchange(&request, &mut timer)).await {
        Err(_) => {
            warn!("Request timed out after {:?}", deadline);
            return TaskResult::Outcome(TaskOutcome::TimedOut);
        }
        Ok(Err(e)) => {
            warn!("Request failed: {:#}", e);
            return TaskResult::Outcome(TaskOutcome::Failed(format!("{:#}", e)));
        }
        Ok(Ok(response)) => response,
    };
    let durations = timer.finalize();

    info!(
        "{:?} {} {} body={} x-body-size={:?} connection={:?} transfer={:?} total={:?}",
        response.version,
        request.method(),
        response.status,
        response.body_len,
        response.body_size_header,
        durations.connection_establishment,
        durations.content_transfer,
        durations.total
    );
    if !response.status.is_success() {
        return TaskResult::Outcome(TaskOutcome::Failed(format!(
            "server answered {}",
            response.status
        )));
    }
    if response.body_size_header != Some(response.body_len) {
        warn!(
            "Body length {} does not match X-Body-Size {:?}",
            response.body_len, response.body_size_header
        );
    }
    debug!("{}", durations);

    match recorder.record(&MetricsRow::from(&durations)).await {
        Ok(()) => TaskResult::Outcome(TaskOutcome::Completed(durations)),
        Err(e) => TaskResult::Fatal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::transport::ExchangeResponse;
    use crate::timing::Phase;
    use hyper::{StatusCode, Version};
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers from memory, failing, stalling or panicking on selected task ids.
    #[derive(Default)]
    struct ScriptedTransport {
        fail: Vec<usize>,
        stall: Vec<usize>,
        panic: Vec<usize>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn healthy() -> Self {
            Self::default()
        }
    }

    impl Transport for ScriptedTransport {
        fn exchange<'a>(
            &'a self,
            request: &'a ExperimentRequest,
            timer: &'a mut PhaseTimer,
        ) -> impl Future<Output = Result<ExchangeResponse, anyhow::Error>> + Send + 'a {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                timer.on_event(Phase::AcquireStart);
                timer.on_event(Phase::DnsStart);
                if self.fail.contains(&request.task_id) {
                    return Err(anyhow!("connection reset"));
                }
                if self.stall.contains(&request.task_id) {
                    std::future::pending::<()>().await;
                }
                if self.panic.contains(&request.task_id) {
                    panic!("transport bug on task {}", request.task_id);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                timer.on_event(Phase::Acquired);
                timer.on_event(Phase::FirstResponseByte);
                timer.on_event(Phase::ResponseRead);
                Ok(ExchangeResponse {
                    version: Version::HTTP_11,
                    status: StatusCode::OK,
                    body_len: 2000,
                    body_size_header: Some(2000),
                })
            }
        }
    }

    fn experiment(concurrency: usize) -> Experiment {
        Experiment {
            target: "http://127.0.0.1:4433/2".parse().unwrap(),
            body: Bytes::new(),
            concurrency,
            deadline: Duration::from_millis(200),
        }
    }

    async fn recorder(dir: &tempfile::TempDir) -> Arc<MetricsRecorder> {
        Arc::new(
            MetricsRecorder::open(dir.path().join("metrics.csv"))
                .await
                .unwrap(),
        )
    }

    fn row_count(dir: &tempfile::TempDir) -> usize {
        let content = std::fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        content.lines().count() - 1
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_task_yields_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::healthy());
        let orchestrator = Orchestrator::new(transport.clone(), recorder(&dir).await);

        let report = orchestrator.run(&experiment(5)).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.completed.len(), 5);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
        assert_eq!(row_count(&dir), 5);
        assert!(report.completed.iter().all(|d| d.total >= d.content_transfer));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_and_timeouts_stay_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport {
            fail: vec![1, 3],
            stall: vec![4],
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(transport, recorder(&dir).await);

        let report = orchestrator.run(&experiment(6)).await.unwrap();
        assert_eq!(report.requested(), 6);
        assert_eq!(report.completed.len(), 3);
        assert_eq!(report.timed_out, 1);
        let mut failed: Vec<usize> = report.failures.iter().map(|(id, _)| *id).collect();
        failed.sort();
        assert_eq!(failed, vec![1, 3]);
        assert!(!report.is_clean());
        assert_eq!(row_count(&dir), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn recorder_failure_cancels_stalled_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        std::fs::write(&path, "").unwrap();
        let read_only = std::fs::File::open(&path).unwrap();
        let recorder = Arc::new(MetricsRecorder::from_std_file(&path, read_only));
        let transport = Arc::new(ScriptedTransport {
            stall: vec![2, 5],
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(transport, recorder);
        let mut experiment = experiment(6);
        experiment.deadline = Duration::from_secs(60);

        let started = std::time::Instant::now();
        let result = timeout(Duration::from_secs(10), orchestrator.run(&experiment))
            .await
            .expect("run should stop once the metrics log fails");
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to write metrics log"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_task_is_counted_and_siblings_still_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport {
            panic: vec![1],
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(transport, recorder(&dir).await);

        let report = orchestrator.run(&experiment(3)).await.unwrap();
        assert_eq!(report.panicked, 1);
        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.requested(), 3);
        assert!(!report.is_clean());
        assert_eq!(row_count(&dir), 2);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator =
            Orchestrator::new(Arc::new(ScriptedTransport::healthy()), recorder(&dir).await);
        assert!(orchestrator.run(&experiment(0)).await.is_err());
    }

    #[test]
    fn report_summarizes_totals() {
        let mut report = RunReport::default();
        for ms in [10, 20, 30] {
            report.push(
                0,
                TaskOutcome::Completed(PhaseDurations {
                    total: Duration::from_millis(ms),
                    ..Default::default()
                }),
            );
        }
        report.push(4, TaskOutcome::Failed("boom".to_string()));
        let text = report.to_string();
        assert!(text.contains("3 completed, 1 failed, 0 timed out"));
        assert!(text.contains("min 10ms, mean 20ms, max 30ms"));
        assert!(text.contains("task 4: boom"));
    }
}
