//! # Director Lifecycle
//!
//! Drives one director container from whatever state it is in to a ready
//! director, using only the [`Cpi`] contract plus two side-effect seams:
//! the [`Ui`] and the [`DirectorClient`].
//!
//! ## Start Sequence
//!
//! ```text
//! ┌──────────────────┐ outdated ┌──────────┐ refused
//! │ image drift check├─────────►│ diff +   ├─────────► Aborted
//! │ (ImageManaged)   │          │ confirm  │
//! └────────┬─────────┘          └────┬─────┘
//!          │ no container, outdated: pull_image without asking
//!          │ current                 │ accepted: remove_container, pull_image
//!          ▼                         ▼
//! ┌──────────────────┐  running  ┌──────────────┐
//! │ prerequisites    ├──────────►│AlreadyRunning│
//! └────────┬─────────┘           └──────────────┘
//!          │ stopped → destroy
//!          ▼
//! ┌──────────────────┐    ┌─────────────────┐    ┌──────────────────┐
//! │ cpi.start()      ├───►│ follow logs ──► │───►│ wait_for_ready   │
//! └──────────────────┘    │ UI + LogBuffer  │    └────────┬─────────┘
//!                         └─────────────────┘             │ ready
//!                                                         ▼
//!                                          cloud-config, stemcell upload
//! ```
//!
//! The follower runs on its own task under a child [`CancellationToken`].
//! It is cancelled as soon as readiness resolves and joined within
//! [`LOG_FOLLOW_GRACE`] before the ring buffer is read.

pub mod director;
pub mod ui;

pub use director::{
    DirectorClient, DirectorConnection, DirectorConnector, Stemcell, StemcellSource, Transport,
};
pub use ui::{ConsoleUi, Ui, UiWriter};

use crate::constants::{
    DEFAULT_READY_TIMEOUT, LOG_BUFFER_CAPACITY, LOG_FOLLOW_GRACE, MAIN_LOG_COMPONENT,
};
use crate::cpi::{ContainerInfo, Cpi, FollowOptions, ImageManaged, LifecycleState, LogSink, LogTail};
use crate::error::{Error, Result};
use crate::logs::{LogBuffer, LogFormat, LogWriter, TeeWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Types
// =============================================================================

/// Where a reconciler is in its start sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcilerState {
    #[default]
    NotStarted,
    Reconciling,
    Ready,
    Failed,
    /// The user refused an image upgrade.
    Aborted,
}

/// Result of [`Reconciler::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The container was already running; nothing was changed.
    AlreadyRunning,
    /// The user declined the image upgrade; nothing was changed.
    Aborted,
    /// The director is ready. `warnings` lists post-start configuration
    /// steps that failed.
    Ready { warnings: Vec<String> },
}

/// Tuning for [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub ready_timeout: Duration,
    /// Stemcell to upload once the director is ready.
    pub stemcell: Option<StemcellSource>,
    /// Colorize the diagnostic log block.
    pub colorize: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
            stemcell: None,
            colorize: false,
        }
    }
}

/// Snapshot returned by [`Reconciler::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: LifecycleState,
    pub info: Option<ContainerInfo>,
}

/// Options for [`Reconciler::logs`].
#[derive(Debug, Clone, Default)]
pub struct LogsRequest {
    pub tail: LogTail,
    pub follow: bool,
    /// Component allow-list; empty shows every component.
    pub components: Vec<String>,
    pub message_only: bool,
    pub colorize: bool,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Lifecycle driver for one director container.
pub struct Reconciler {
    cpi: Arc<dyn Cpi>,
    ui: Arc<dyn Ui>,
    director: Option<Arc<dyn DirectorConnector>>,
    options: ReconcilerOptions,
    state: ReconcilerState,
}

impl Reconciler {
    pub fn new(cpi: Arc<dyn Cpi>, ui: Arc<dyn Ui>) -> Self {
        Self {
            cpi,
            ui,
            director: None,
            options: ReconcilerOptions::default(),
            state: ReconcilerState::NotStarted,
        }
    }

    /// Enables post-start configuration through clients built by `connector`.
    pub fn with_director(mut self, connector: Arc<dyn DirectorConnector>) -> Self {
        self.director = Some(connector);
        self
    }

    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn cpi(&self) -> &Arc<dyn Cpi> {
        &self.cpi
    }

    /// Brings the director up, upgrading the image first if the backend
    /// manages images and the user agrees.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<StartOutcome> {
        self.state = ReconcilerState::Reconciling;
        let result = self.reconcile(cancel).await;
        self.state = match &result {
            Ok(StartOutcome::Aborted) => ReconcilerState::Aborted,
            Ok(_) => ReconcilerState::Ready,
            Err(_) => ReconcilerState::Failed,
        };
        result
    }

    async fn reconcile(&self, cancel: &CancellationToken) -> Result<StartOutcome> {
        if let Some(images) = self.cpi.image_managed()
            && !self.upgrade_if_outdated(images).await?
        {
            return Ok(StartOutcome::Aborted);
        }

        self.cpi.ensure_prerequisites().await?;

        if self.cpi.is_running().await? {
            self.ui.print_line(&format!(
                "Director container '{}' is already running.",
                self.cpi.container_name()
            ));
            self.print_connection();
            return Ok(StartOutcome::AlreadyRunning);
        }

        if self.cpi.exists().await? {
            self.ui.print_line(&format!(
                "Removing stopped container '{}' before recreating it...",
                self.cpi.container_name()
            ));
            self.cpi.destroy().await?;
            self.cpi.ensure_prerequisites().await?;
        }

        self.ui.print_line(&format!(
            "Starting director container '{}' on {}...",
            self.cpi.container_name(),
            self.cpi.backend_name()
        ));
        self.cpi.start().await?;

        let buffer = LogBuffer::new(LOG_BUFFER_CAPACITY);
        let follower_cancel = cancel.child_token();
        let follower = self.spawn_follower(follower_cancel.clone(), buffer.clone());

        let ready = self
            .cpi
            .wait_for_ready(cancel, self.options.ready_timeout)
            .await;

        follower_cancel.cancel();
        join_follower(follower).await;

        if let Err(e) = ready {
            if !e.is_cancelled() {
                self.print_diagnostics(&buffer);
            }
            return Err(e);
        }

        info!(url = %self.cpi.director_url(), "director is ready");
        self.ui.print_line(&format!(
            "Director is ready at {}",
            self.cpi.director_url()
        ));
        self.print_connection();

        let warnings = self.configure_director().await;
        Ok(StartOutcome::Ready { warnings })
    }

    /// Returns `Ok(false)` when the user refuses a pending upgrade.
    ///
    /// Without an existing container there is nothing to replace, so an
    /// outdated image is pulled without asking.
    async fn upgrade_if_outdated(&self, images: &dyn ImageManaged) -> Result<bool> {
        let outdated = match images.check_for_image_update().await {
            Ok(outdated) => outdated,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                self.warn(&format!("could not check for image updates: {}", e));
                return Ok(true);
            }
        };
        if !outdated {
            debug!("director image is current");
            return Ok(true);
        }

        if !self.cpi.exists().await? {
            info!("pulling newer director image before first start");
            self.ui.print_line("Pulling the latest director image...");
            images.pull_image().await?;
            return Ok(true);
        }

        self.ui.print_line("A newer director image is available.");
        match images.manifest_diff().await {
            Ok(diff) if diff.trim().is_empty() => {
                self.ui.print_line("The director manifest is unchanged.");
            }
            Ok(diff) => {
                self.ui.print_line("Director manifest changes:");
                for line in diff.lines() {
                    self.ui.print_line(line);
                }
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => self.warn(&format!("could not compute the manifest diff: {}", e)),
        }

        let confirmed = self.confirm(
            "Upgrade the director container? Persistent volumes are kept.",
        )?;
        if !confirmed {
            self.ui
                .print_line("Upgrade declined; the existing container was left untouched.");
            return Ok(false);
        }

        info!(container = %self.cpi.container_name(), "upgrading director image");
        images.remove_container().await?;
        images.pull_image().await?;
        Ok(true)
    }

    fn spawn_follower(
        &self,
        cancel: CancellationToken,
        buffer: LogBuffer,
    ) -> JoinHandle<Result<()>> {
        let stdout: LogSink = Box::new(TeeWriter::new(self.ui_log_writer(), buffer.clone()));
        let stderr: LogSink = Box::new(TeeWriter::new(self.ui_log_writer(), buffer));
        let options = FollowOptions {
            follow: true,
            tail: LogTail::All,
        };

        let cpi = Arc::clone(&self.cpi);
        tokio::spawn(async move { cpi.follow_logs(cancel, options, stdout, stderr).await })
    }

    fn ui_log_writer(&self) -> LogWriter<UiWriter> {
        LogWriter::new(UiWriter::new(Arc::clone(&self.ui)))
            .with_format(LogFormat::MessageOnly)
            .with_components([MAIN_LOG_COMPONENT])
    }

    fn print_diagnostics(&self, buffer: &LogBuffer) {
        let lines = buffer.formatted_lines(self.options.colorize);
        if lines.is_empty() {
            self.ui
                .error_line("Director failed to become ready; no container logs were captured.");
            return;
        }
        self.ui.error_line(&format!(
            "Director failed to become ready. Last {} log lines:",
            lines.len()
        ));
        for line in &lines {
            self.ui.error_line(line);
        }
    }

    fn print_connection(&self) {
        for line in DirectorConnection::for_cpi(self.cpi.as_ref()).instructions() {
            self.ui.print_line(&line);
        }
    }

    /// Applies cloud-config and uploads the stemcell. Each failure becomes a
    /// warning; none undoes the start.
    async fn configure_director(&self) -> Vec<String> {
        let Some(connector) = &self.director else {
            return Vec::new();
        };

        let mut warnings = Vec::new();
        let connection = DirectorConnection::for_cpi(self.cpi.as_ref());
        let client = match connector.connect(&connection) {
            Ok(client) => client,
            Err(e) => {
                warnings.push(format!("could not connect to the director: {}", e));
                self.report(&warnings);
                return warnings;
            }
        };

        match self.cpi.cloud_config_bytes() {
            Ok(bytes) => match client.update_cloud_config(&bytes).await {
                Ok(()) => self.ui.print_line("Cloud config updated."),
                Err(e) => warnings.push(format!("cloud-config update failed: {}", e)),
            },
            Err(e) => warnings.push(format!("could not render cloud-config: {}", e)),
        }

        if let Some(stemcell) = &self.options.stemcell
            && let Err(e) = self.ensure_stemcell(client.as_ref(), stemcell).await
        {
            warnings.push(format!("stemcell upload failed: {}", e));
        }

        self.report(&warnings);
        warnings
    }

    async fn ensure_stemcell(
        &self,
        client: &dyn DirectorClient,
        stemcell: &StemcellSource,
    ) -> Result<()> {
        let present = client.stemcells().await?;
        if present.iter().any(|s| stemcell.matches(s)) {
            debug!(name = %stemcell.name, version = %stemcell.version, "stemcell already uploaded");
            return Ok(());
        }

        self.ui.print_line(&format!(
            "Uploading stemcell {}/{}...",
            stemcell.name, stemcell.version
        ));
        client.upload_stemcell(&stemcell.url).await?;
        self.ui.print_line("Stemcell uploaded.");
        Ok(())
    }

    fn report(&self, warnings: &[String]) {
        for warning in warnings {
            self.warn(warning);
        }
    }

    /// An unanswerable prompt counts as a refusal.
    fn confirm(&self, prompt: &str) -> Result<bool> {
        match self.ui.ask_for_confirmation(prompt) {
            Err(Error::UserAborted) => {
                debug!("no answer to {:?}", prompt);
                Ok(false)
            }
            answer => answer,
        }
    }

    fn warn(&self, message: &str) {
        warn!("{}", message);
        self.ui.error_line(&format!("Warning: {}", message));
    }

    // =========================================================================
    // Supplementary operations
    // =========================================================================

    /// Stops the container if it is running.
    pub async fn stop(&self) -> Result<()> {
        if !self.cpi.is_running().await? {
            self.ui.print_line(&format!(
                "Director container '{}' is not running.",
                self.cpi.container_name()
            ));
            return Ok(());
        }
        self.cpi.stop().await?;
        self.ui.print_line(&format!(
            "Director container '{}' stopped.",
            self.cpi.container_name()
        ));
        Ok(())
    }

    /// Destroys container, volumes and network after confirmation.
    ///
    /// Returns `Ok(false)` when the user declines.
    pub async fn destroy(&self) -> Result<bool> {
        let prompt = format!(
            "Destroy director container '{}' together with its volumes and network?",
            self.cpi.container_name()
        );
        if !self.confirm(&prompt)? {
            self.ui.print_line("Destroy cancelled.");
            return Ok(false);
        }
        self.cpi.destroy().await?;
        self.ui.print_line(&format!(
            "Director container '{}' destroyed.",
            self.cpi.container_name()
        ));
        Ok(true)
    }

    /// Prints and returns the container's lifecycle state.
    pub async fn status(&self) -> Result<StatusReport> {
        let exists = self.cpi.exists().await?;
        let running = exists && self.cpi.is_running().await?;
        let state = LifecycleState::from_flags(exists, running);

        let info = if exists {
            Some(self.cpi.container_info().await?)
        } else {
            None
        };

        match &info {
            Some(info) => {
                self.ui.print_line(&format!("Container: {}", info.name));
                self.ui.print_line(&format!("Created:   {}", info.created));
                self.ui.print_line(&format!("Network:   {}", info.network));
            }
            None => self.ui.print_line(&format!(
                "Container: {} (not created)",
                self.cpi.container_name()
            )),
        }
        self.ui.print_line(&format!("State:     {}", state));
        if state == LifecycleState::Running {
            self.print_connection();
        }

        Ok(StatusReport { state, info })
    }

    /// Streams container logs through a [`LogWriter`] until the history is
    /// exhausted (no follow) or `cancel` fires.
    pub async fn logs(
        &self,
        cancel: CancellationToken,
        request: LogsRequest,
        stdout: LogSink,
        stderr: LogSink,
    ) -> Result<()> {
        let format = if request.message_only {
            LogFormat::MessageOnly
        } else {
            LogFormat::Full
        };
        let wrap = |sink: LogSink| -> LogSink {
            Box::new(
                LogWriter::new(sink)
                    .with_format(format)
                    .with_components(request.components.iter().cloned())
                    .with_colorize(request.colorize),
            )
        };
        let options = FollowOptions {
            follow: request.follow,
            tail: request.tail,
        };

        self.cpi
            .follow_logs(cancel, options, wrap(stdout), wrap(stderr))
            .await
    }

    /// Runs a command in the director container and returns its stdout.
    pub async fn exec(&self, cmd: &[String]) -> Result<String> {
        if cmd.is_empty() {
            return Err(Error::Config("exec requires a command".to_string()));
        }
        self.cpi
            .exec_command(self.cpi.container_name(), cmd)
            .await
    }
}

async fn join_follower(mut follower: JoinHandle<Result<()>>) {
    match tokio::time::timeout(LOG_FOLLOW_GRACE, &mut follower).await {
        Ok(Ok(Ok(()))) => debug!("log follower finished"),
        Ok(Ok(Err(e))) => debug!("log follower ended with error: {}", e),
        Ok(Err(e)) => warn!("log follower task failed: {}", e),
        Err(_) => {
            warn!(
                "log follower did not stop within {:?}; aborting it",
                LOG_FOLLOW_GRACE
            );
            follower.abort();
        }
    }
}
