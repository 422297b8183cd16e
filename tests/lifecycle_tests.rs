//! Tests for the lifecycle reconciler.
//!
//! The reconciler is driven against in-memory fakes of the backend, the UI
//! and the director client, each recording the calls it receives.

use async_trait::async_trait;
use director_box::cpi::{
    ContainerInfo, Cpi, FollowOptions, ImageManaged, LifecycleState, LogSink, LogTail,
};
use director_box::lifecycle::{
    DirectorClient, DirectorConnection, DirectorConnector, LogsRequest, Reconciler,
    ReconcilerOptions, ReconcilerState, StartOutcome, Stemcell, StemcellSource, Transport, Ui,
};
use director_box::{Error, Result};
use std::io::Write as _;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, call: impl Into<String>) {
    log.lock().unwrap().push(call.into());
}

fn count(log: &CallLog, call: &str) -> usize {
    log.lock().unwrap().iter().filter(|c| *c == call).count()
}

fn position(log: &CallLog, call: &str) -> Option<usize> {
    log.lock().unwrap().iter().position(|c| c == call)
}

// =============================================================================
// Fakes
// =============================================================================

#[derive(Clone, Copy)]
enum Readiness {
    Ready,
    TimesOut,
    Cancelled,
}

#[derive(Clone, Copy)]
enum UpdateCheck {
    Current,
    Outdated,
    Fails,
}

struct FakeImages {
    calls: CallLog,
    exists: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    check: UpdateCheck,
    diff: Option<String>,
}

#[async_trait]
impl ImageManaged for FakeImages {
    async fn check_for_image_update(&self) -> Result<bool> {
        record(&self.calls, "check_for_image_update");
        match self.check {
            UpdateCheck::Current => Ok(false),
            UpdateCheck::Outdated => Ok(true),
            UpdateCheck::Fails => Err(Error::Registry {
                operation: "fetch digest",
                reference: "ghcr.io/acme/director:latest".to_string(),
                reason: "registry unreachable".to_string(),
            }),
        }
    }

    async fn manifest_diff(&self) -> Result<String> {
        record(&self.calls, "manifest_diff");
        self.diff
            .clone()
            .ok_or_else(|| Error::ManifestDiff("manifest missing".to_string()))
    }

    async fn pull_image(&self) -> Result<()> {
        record(&self.calls, "pull_image");
        Ok(())
    }

    async fn remove_container(&self) -> Result<()> {
        record(&self.calls, "remove_container");
        self.exists.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeCpi {
    calls: CallLog,
    exists: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    readiness: Readiness,
    direct: bool,
    log_lines: Vec<String>,
    images: Option<FakeImages>,
    ready_timeouts: Mutex<Vec<Duration>>,
}

impl FakeCpi {
    fn new(calls: CallLog) -> Self {
        Self {
            calls,
            exists: Arc::default(),
            running: Arc::default(),
            readiness: Readiness::Ready,
            direct: false,
            log_lines: vec![
                "[director] 2024-05-01T12:00:00Z INFO - Starting director".to_string(),
                "[nats] 2024-05-01T12:00:01Z INFO - nats ready".to_string(),
                "[director] 2024-05-01T12:00:02Z ERROR - database unreachable".to_string(),
            ],
            images: None,
            ready_timeouts: Mutex::new(Vec::new()),
        }
    }

    fn stopped(self) -> Self {
        self.exists.store(true, Ordering::SeqCst);
        self
    }

    fn running(self) -> Self {
        self.exists.store(true, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self
    }

    fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    fn with_images(mut self, check: UpdateCheck, diff: Option<&str>) -> Self {
        self.images = Some(FakeImages {
            calls: self.calls.clone(),
            exists: self.exists.clone(),
            running: self.running.clone(),
            check,
            diff: diff.map(str::to_string),
        });
        self
    }
}

#[async_trait]
impl Cpi for FakeCpi {
    fn backend_name(&self) -> &'static str {
        "fake"
    }

    async fn start(&self) -> Result<()> {
        record(&self.calls, "start");
        self.exists.store(true, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        record(&self.calls, "stop");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        record(&self.calls, "destroy");
        self.exists.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_prerequisites(&self) -> Result<()> {
        record(&self.calls, "ensure_prerequisites");
        Ok(())
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.exists.load(Ordering::SeqCst))
    }

    async fn container_info(&self) -> Result<ContainerInfo> {
        Ok(ContainerInfo {
            name: "director".to_string(),
            created: "2024-05-01T12:00:00Z".to_string(),
            network: "director-net".to_string(),
        })
    }

    async fn exec_command(&self, container: &str, cmd: &[String]) -> Result<String> {
        record(&self.calls, format!("exec {} {}", container, cmd.join(" ")));
        Ok("ok\n".to_string())
    }

    async fn get_logs(&self, tail: LogTail) -> Result<String> {
        let all = format!("{}\n", self.log_lines.join("\n"));
        Ok(tail.apply(&all).to_string())
    }

    async fn follow_logs(
        &self,
        cancel: CancellationToken,
        options: FollowOptions,
        mut stdout: LogSink,
        mut stderr: LogSink,
    ) -> Result<()> {
        record(&self.calls, "follow_logs");
        for line in &self.log_lines {
            writeln!(stdout, "{}", line)?;
        }
        writeln!(stderr, "init: mounting volumes")?;
        if options.follow {
            cancel.cancelled().await;
        }
        Ok(())
    }

    async fn wait_for_ready(&self, _cancel: &CancellationToken, max_wait: Duration) -> Result<()> {
        record(&self.calls, "wait_for_ready");
        self.ready_timeouts.lock().unwrap().push(max_wait);
        match self.readiness {
            Readiness::Ready => Ok(()),
            Readiness::TimesOut => Err(Error::ReadinessTimeout {
                waited: max_wait,
                last_error: "connection refused".to_string(),
            }),
            Readiness::Cancelled => Err(Error::Cancelled),
        }
    }

    fn cloud_config_bytes(&self) -> Result<Vec<u8>> {
        Ok(b"azs:\n- name: z1\n".to_vec())
    }

    fn container_name(&self) -> &str {
        "director"
    }

    fn container_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(10, 245, 0, 10)
    }

    fn director_port(&self) -> u16 {
        25555
    }

    fn ssh_port(&self) -> u16 {
        2222
    }

    fn has_direct_network_access(&self) -> bool {
        self.direct
    }

    fn image_managed(&self) -> Option<&dyn ImageManaged> {
        self.images.as_ref().map(|images| images as &dyn ImageManaged)
    }
}

#[derive(Default)]
struct FakeUi {
    lines: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    answer: bool,
    input_closed: bool,
}

impl FakeUi {
    fn answering(answer: bool) -> Self {
        Self {
            answer,
            ..Self::default()
        }
    }

    fn input_closed() -> Self {
        Self {
            input_closed: true,
            ..Self::default()
        }
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn prompts(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn printed(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }
}

impl Ui for FakeUi {
    fn print_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn error_line(&self, line: &str) {
        self.errors.lock().unwrap().push(line.to_string());
    }

    fn ask_for_confirmation(&self, prompt: &str) -> Result<bool> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.input_closed {
            return Err(Error::UserAborted);
        }
        Ok(self.answer)
    }
}

struct FakeDirector {
    calls: CallLog,
    stemcells: Vec<Stemcell>,
    cloud_config_fails: bool,
    connections: Mutex<Vec<DirectorConnection>>,
}

impl FakeDirector {
    fn new(calls: CallLog) -> Self {
        Self {
            calls,
            stemcells: Vec::new(),
            cloud_config_fails: false,
            connections: Mutex::new(Vec::new()),
        }
    }
}

struct FakeDirectorClient(Arc<FakeDirector>);

#[async_trait]
impl DirectorClient for FakeDirectorClient {
    async fn update_cloud_config(&self, cloud_config: &[u8]) -> Result<()> {
        record(&self.0.calls, "update_cloud_config");
        assert!(!cloud_config.is_empty());
        if self.0.cloud_config_fails {
            return Err(Error::Director {
                operation: "update cloud-config",
                reason: "401 unauthorized".to_string(),
            });
        }
        Ok(())
    }

    async fn stemcells(&self) -> Result<Vec<Stemcell>> {
        record(&self.0.calls, "stemcells");
        Ok(self.0.stemcells.clone())
    }

    async fn upload_stemcell(&self, url: &str) -> Result<()> {
        record(&self.0.calls, format!("upload_stemcell {}", url));
        Ok(())
    }
}

struct FakeConnector(Arc<FakeDirector>);

impl DirectorConnector for FakeConnector {
    fn connect(&self, connection: &DirectorConnection) -> Result<Arc<dyn DirectorClient>> {
        self.0.connections.lock().unwrap().push(connection.clone());
        Ok(Arc::new(FakeDirectorClient(self.0.clone())))
    }
}

struct Harness {
    calls: CallLog,
    cpi: Arc<FakeCpi>,
    ui: Arc<FakeUi>,
    director: Arc<FakeDirector>,
    reconciler: Reconciler,
}

fn harness_with(
    build: impl FnOnce(FakeCpi) -> FakeCpi,
    ui: FakeUi,
    director: impl FnOnce(CallLog) -> FakeDirector,
    options: ReconcilerOptions,
) -> Harness {
    let calls: CallLog = Arc::default();
    let cpi = Arc::new(build(FakeCpi::new(calls.clone())));
    let ui = Arc::new(ui);
    let director = Arc::new(director(calls.clone()));
    let reconciler = Reconciler::new(cpi.clone(), ui.clone())
        .with_director(Arc::new(FakeConnector(director.clone())))
        .with_options(options);
    Harness {
        calls,
        cpi,
        ui,
        director,
        reconciler,
    }
}

fn harness(build: impl FnOnce(FakeCpi) -> FakeCpi) -> Harness {
    harness_with(
        build,
        FakeUi::answering(true),
        FakeDirector::new,
        ReconcilerOptions {
            ready_timeout: Duration::from_secs(42),
            ..ReconcilerOptions::default()
        },
    )
}

// =============================================================================
// Start Sequence Tests
// =============================================================================

#[tokio::test]
async fn test_fresh_start() {
    let mut h = harness(|cpi| cpi);

    let outcome = h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, StartOutcome::Ready { warnings: vec![] });
    assert_eq!(h.reconciler.state(), ReconcilerState::Ready);
    assert_eq!(count(&h.calls, "start"), 1);
    assert_eq!(count(&h.calls, "destroy"), 0);
    assert_eq!(count(&h.calls, "wait_for_ready"), 1);
    assert_eq!(
        *h.cpi.ready_timeouts.lock().unwrap(),
        vec![Duration::from_secs(42)]
    );
    assert_eq!(h.ui.printed("is ready"), 1);
    assert_eq!(count(&h.calls, "update_cloud_config"), 1);
    assert!(position(&h.calls, "follow_logs") < position(&h.calls, "update_cloud_config"));
}

#[tokio::test]
async fn test_follower_shows_main_component_messages_only() {
    let mut h = harness(|cpi| cpi);

    h.reconciler.start(&CancellationToken::new()).await.unwrap();

    let lines = h.ui.lines();
    assert!(lines.contains(&"Starting director".to_string()), "{:?}", lines);
    assert!(lines.contains(&"database unreachable".to_string()));
    assert!(!lines.iter().any(|l| l.contains("nats ready")));
}

#[tokio::test]
async fn test_stale_container_destroyed_before_start() {
    let mut h = harness(|cpi| cpi.stopped());

    h.reconciler.start(&CancellationToken::new()).await.unwrap();

    let destroy = position(&h.calls, "destroy").expect("destroy called");
    let start = position(&h.calls, "start").expect("start called");
    assert!(destroy < start);
    assert_eq!(count(&h.calls, "stop"), 0);
}

#[tokio::test]
async fn test_already_running_is_left_alone() {
    let mut h = harness(|cpi| cpi.running());

    let outcome = h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, StartOutcome::AlreadyRunning);
    assert_eq!(count(&h.calls, "destroy"), 0);
    assert_eq!(count(&h.calls, "start"), 0);
    assert_eq!(count(&h.calls, "wait_for_ready"), 0);
    assert_eq!(count(&h.calls, "update_cloud_config"), 0);
    assert_eq!(h.ui.printed("already running"), 1);
    assert_eq!(h.ui.printed("Director URL: https://127.0.0.1:25555"), 1);
    assert_eq!(h.ui.printed("SSH tunnel:   127.0.0.1:2222"), 1);
}

#[tokio::test]
async fn test_readiness_timeout_prints_buffered_logs() {
    let mut h = harness(|cpi| cpi.with_readiness(Readiness::TimesOut));

    let err = h
        .reconciler
        .start(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ReadinessTimeout { .. }));
    assert_eq!(h.reconciler.state(), ReconcilerState::Failed);

    let errors = h.ui.errors();
    assert!(errors.iter().any(|l| l.contains("failed to become ready")));
    assert!(errors.contains(&"[director] 12:00:02.000 ERROR - database unreachable".to_string()));
    assert!(errors.contains(&"[nats] 12:00:01.000 INFO - nats ready".to_string()));
    assert!(errors.contains(&"init: mounting volumes".to_string()));

    assert_eq!(count(&h.calls, "update_cloud_config"), 0);
    assert_eq!(count(&h.calls, "stemcells"), 0);
    assert_eq!(h.ui.printed("is ready"), 0);
}

#[tokio::test]
async fn test_cancelled_wait_skips_diagnostics() {
    let mut h = harness(|cpi| cpi.with_readiness(Readiness::Cancelled));

    let err = h
        .reconciler
        .start(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(h.ui.errors().is_empty());
}

// =============================================================================
// Image Drift Tests
// =============================================================================

#[tokio::test]
async fn test_upgrade_refused_changes_nothing() {
    let mut h = harness_with(
        |cpi| {
            cpi.stopped()
                .with_images(UpdateCheck::Outdated, Some("~ image.digest: a -> b\n"))
        },
        FakeUi::answering(false),
        FakeDirector::new,
        ReconcilerOptions::default(),
    );

    let outcome = h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, StartOutcome::Aborted);
    assert_eq!(h.reconciler.state(), ReconcilerState::Aborted);
    assert_eq!(h.ui.prompts(), 1);
    assert_eq!(h.ui.printed("~ image.digest: a -> b"), 1);
    for call in ["remove_container", "pull_image", "destroy", "start", "ensure_prerequisites"] {
        assert_eq!(count(&h.calls, call), 0, "{} should not run", call);
    }
}

#[tokio::test]
async fn test_upgrade_without_answer_is_refused() {
    let mut h = harness_with(
        |cpi| cpi.running().with_images(UpdateCheck::Outdated, Some("")),
        FakeUi::input_closed(),
        FakeDirector::new,
        ReconcilerOptions::default(),
    );

    let outcome = h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, StartOutcome::Aborted);
    assert_eq!(count(&h.calls, "remove_container"), 0);
    assert_eq!(count(&h.calls, "pull_image"), 0);
}

#[tokio::test]
async fn test_upgrade_accepted_replaces_container() {
    let mut h = harness(|cpi| {
        cpi.running()
            .with_images(UpdateCheck::Outdated, Some("~ image.digest: a -> b\n"))
    });

    h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(h.ui.prompts(), 1);
    assert_eq!(count(&h.calls, "destroy"), 0);
    let remove = position(&h.calls, "remove_container").unwrap();
    let pull = position(&h.calls, "pull_image").unwrap();
    let start = position(&h.calls, "start").unwrap();
    assert!(remove < pull && pull < start);
}

#[tokio::test]
async fn test_diff_failure_warns_and_still_prompts() {
    let mut h = harness_with(
        |cpi| cpi.stopped().with_images(UpdateCheck::Outdated, None),
        FakeUi::answering(false),
        FakeDirector::new,
        ReconcilerOptions::default(),
    );

    let outcome = h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, StartOutcome::Aborted);
    assert_eq!(h.ui.prompts(), 1);
    assert!(
        h.ui.errors()
            .iter()
            .any(|l| l.starts_with("Warning:") && l.contains("manifest diff"))
    );
}

#[tokio::test]
async fn test_update_check_failure_continues_without_prompt() {
    let mut h = harness(|cpi| cpi.stopped().with_images(UpdateCheck::Fails, None));

    let outcome = h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert!(matches!(outcome, StartOutcome::Ready { .. }));
    assert_eq!(h.ui.prompts(), 0);
    assert!(h.ui.errors().iter().any(|l| l.contains("registry unreachable")));
    assert_eq!(count(&h.calls, "start"), 1);
}

#[tokio::test]
async fn test_current_image_skips_prompt() {
    let mut h = harness(|cpi| cpi.stopped().with_images(UpdateCheck::Current, None));

    h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(h.ui.prompts(), 0);
    assert_eq!(count(&h.calls, "manifest_diff"), 0);
}

#[tokio::test]
async fn test_fresh_install_pulls_outdated_image_without_prompt() {
    let mut h = harness(|cpi| cpi.with_images(UpdateCheck::Outdated, Some("x")));

    h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(count(&h.calls, "check_for_image_update"), 1);
    assert_eq!(count(&h.calls, "pull_image"), 1);
    assert_eq!(count(&h.calls, "manifest_diff"), 0);
    assert_eq!(count(&h.calls, "remove_container"), 0);
    assert_eq!(h.ui.prompts(), 0);
    assert!(position(&h.calls, "pull_image") < position(&h.calls, "start"));
}

#[tokio::test]
async fn test_fresh_install_with_current_image_skips_pull() {
    let mut h = harness(|cpi| cpi.with_images(UpdateCheck::Current, None));

    h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(count(&h.calls, "check_for_image_update"), 1);
    assert_eq!(count(&h.calls, "pull_image"), 0);
    assert_eq!(count(&h.calls, "start"), 1);
}

// =============================================================================
// Post-start Configuration Tests
// =============================================================================

#[tokio::test]
async fn test_cloud_config_failure_is_a_warning() {
    let mut h = harness_with(
        |cpi| cpi,
        FakeUi::answering(true),
        |calls| FakeDirector {
            cloud_config_fails: true,
            ..FakeDirector::new(calls)
        },
        ReconcilerOptions {
            stemcell: Some(StemcellSource {
                url: "https://example.com/stemcell.tgz".to_string(),
                name: "ubuntu-jammy".to_string(),
                version: "1.200".to_string(),
            }),
            ..ReconcilerOptions::default()
        },
    );

    let outcome = h.reconciler.start(&CancellationToken::new()).await.unwrap();

    match outcome {
        StartOutcome::Ready { warnings } => {
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].contains("cloud-config"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(
        count(&h.calls, "upload_stemcell https://example.com/stemcell.tgz"),
        1
    );
    assert_eq!(count(&h.calls, "destroy"), 0);
    assert_eq!(count(&h.calls, "stop"), 0);
}

#[tokio::test]
async fn test_stemcell_already_present_is_not_uploaded() {
    let mut h = harness_with(
        |cpi| cpi,
        FakeUi::answering(true),
        |calls| FakeDirector {
            stemcells: vec![Stemcell {
                name: "ubuntu-jammy".to_string(),
                version: "1.200".to_string(),
            }],
            ..FakeDirector::new(calls)
        },
        ReconcilerOptions {
            stemcell: Some(StemcellSource {
                url: "https://example.com/stemcell.tgz".to_string(),
                name: "ubuntu-jammy".to_string(),
                version: "1.200".to_string(),
            }),
            ..ReconcilerOptions::default()
        },
    );

    h.reconciler.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(count(&h.calls, "stemcells"), 1);
    assert!(!h.calls.lock().unwrap().iter().any(|c| c.starts_with("upload_stemcell")));
}

#[tokio::test]
async fn test_connection_handed_to_director_client() {
    let mut h = harness(|cpi| cpi);

    h.reconciler.start(&CancellationToken::new()).await.unwrap();

    let connections = h.director.connections.lock().unwrap().clone();
    assert_eq!(
        connections,
        vec![DirectorConnection {
            url: "https://127.0.0.1:25555".to_string(),
            transport: Transport::Tunnel {
                host: "127.0.0.1".to_string(),
                port: 2222,
            },
        }]
    );
}

#[test]
fn test_direct_connection_uses_container_ip() {
    let mut cpi = FakeCpi::new(Arc::default());
    cpi.direct = true;

    let connection = DirectorConnection::for_cpi(&cpi);

    assert_eq!(connection.url, "https://10.245.0.10:25555");
    assert_eq!(connection.transport, Transport::Direct);
}

// =============================================================================
// Supplementary Operation Tests
// =============================================================================

#[tokio::test]
async fn test_destroy_requires_confirmation() {
    let h = harness_with(
        |cpi| cpi.stopped(),
        FakeUi::answering(false),
        FakeDirector::new,
        ReconcilerOptions::default(),
    );

    assert!(!h.reconciler.destroy().await.unwrap());
    assert_eq!(count(&h.calls, "destroy"), 0);

    let h = harness(|cpi| cpi.stopped());
    assert!(h.reconciler.destroy().await.unwrap());
    assert_eq!(count(&h.calls, "destroy"), 1);
}

#[tokio::test]
async fn test_destroy_without_answer_is_declined() {
    let h = harness_with(
        |cpi| cpi.stopped(),
        FakeUi::input_closed(),
        FakeDirector::new,
        ReconcilerOptions::default(),
    );

    assert!(!h.reconciler.destroy().await.unwrap());
    assert_eq!(count(&h.calls, "destroy"), 0);
}

#[tokio::test]
async fn test_stop_only_when_running() {
    let h = harness(|cpi| cpi.stopped());
    h.reconciler.stop().await.unwrap();
    assert_eq!(count(&h.calls, "stop"), 0);

    let h = harness(|cpi| cpi.running());
    h.reconciler.stop().await.unwrap();
    assert_eq!(count(&h.calls, "stop"), 1);
}

#[tokio::test]
async fn test_status_reports_state_and_info() {
    let h = harness(|cpi| cpi.running());

    let report = h.reconciler.status().await.unwrap();

    assert_eq!(report.state, LifecycleState::Running);
    assert_eq!(report.info.unwrap().network, "director-net");
    assert_eq!(h.ui.printed("State:     running"), 1);
    assert_eq!(h.ui.printed("Director URL"), 1);

    let h = harness(|cpi| cpi);
    let report = h.reconciler.status().await.unwrap();
    assert_eq!(report.state, LifecycleState::Absent);
    assert!(report.info.is_none());
}

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_logs_filters_by_component() {
    let h = harness(|cpi| cpi.running());
    let stdout = SharedSink::default();

    h.reconciler
        .logs(
            CancellationToken::new(),
            LogsRequest {
                components: vec!["nats".to_string()],
                message_only: true,
                ..LogsRequest::default()
            },
            Box::new(stdout.clone()),
            Box::new(std::io::sink()),
        )
        .await
        .unwrap();

    let out = String::from_utf8(stdout.0.lock().unwrap().clone()).unwrap();
    assert_eq!(out, "nats ready\n");
}

#[tokio::test]
async fn test_exec_uses_container_name() {
    let h = harness(|cpi| cpi.running());

    let out = h
        .reconciler
        .exec(&["monit".to_string(), "summary".to_string()])
        .await
        .unwrap();

    assert_eq!(out, "ok\n");
    assert_eq!(count(&h.calls, "exec director monit summary"), 1);
    assert!(matches!(h.reconciler.exec(&[]).await, Err(Error::Config(_))));
}
