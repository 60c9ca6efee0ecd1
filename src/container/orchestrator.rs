//! Sandbox session orchestration.
//!
//! Drives one session through create → start → attach → run → stop →
//! commit → remove. Every step returns an explicit result; whichever step
//! fails, the remaining cleanup (stop if started, remove if created, restore
//! the terminal if it was changed) still runs before the failure is reported.

use crate::container::{
    AttachSpec, ContainerSpec, DETACH_STOP_GRACE_SECS, DuplexPump, Engine, PumpEvent,
    ReferenceGenerator, Result, SandboxError, SandboxSession, SessionIo, SessionOptions,
    SessionOutcome, SessionState, StopHandle, StreamDirection, TerminalControl,
    TerminalController, UuidReferenceGenerator, commit_reference, ensure_image_present,
    parse_mount_specs,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to run: a named session from a local base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Container name, also the repository of the committed image
    pub name: String,
    /// Base image reference, must exist locally
    pub image: String,
    /// Raw `source:target` bind mounts
    pub mounts: Vec<String>,
}

impl SessionRequest {
    pub fn new<N: Into<String>, I: Into<String>>(name: N, image: I) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            mounts: Vec::new(),
        }
    }

    /// Add a raw `source:target` mount.
    pub fn mount<S: Into<String>>(mut self, raw: S) -> Self {
        self.mounts.push(raw.into());
        self
    }
}

/// Mutable state threaded through one run.
struct SessionRun {
    session: SandboxSession,
    primary: Option<SandboxError>,
    teardown: Vec<SandboxError>,
    final_image: Option<String>,
}

impl SessionRun {
    fn new(session: SandboxSession) -> Self {
        Self {
            session,
            primary: None,
            teardown: Vec::new(),
            final_image: None,
        }
    }

    /// Record a failure that ends the sequence.
    fn fail(&mut self, error: SandboxError) {
        warn!("Session {} failed: {}", self.session.name, error);
        self.primary.get_or_insert(error);
        if self.session.state != SessionState::Error {
            self.session.transition(SessionState::Error);
        }
    }

    /// Record a failure that marks the session failed but lets it wind down.
    fn abort_with(&mut self, error: SandboxError) {
        warn!("Session {} aborted: {}", self.session.name, error);
        self.primary.get_or_insert(error);
    }

    fn record(&mut self, error: SandboxError) {
        warn!("{}", error);
        self.teardown.push(error);
    }
}

/// Shutdown signal observed for the whole session, from validation to exit.
struct ShutdownWatch<'a> {
    signal: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
    fired: bool,
}

impl<'a> ShutdownWatch<'a> {
    fn new<F>(signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        Self {
            signal: Box::pin(signal),
            fired: false,
        }
    }

    fn fired(&self) -> bool {
        self.fired
    }

    /// Run `step` unless shutdown fires first; the step is dropped if it does.
    async fn guard<T>(&mut self, step: impl Future<Output = T>) -> Option<T> {
        if self.fired {
            return None;
        }
        tokio::select! {
            biased;
            () = &mut self.signal => {
                self.fired = true;
                None
            }
            value = step => Some(value),
        }
    }

    /// Run `step` to completion, noting a shutdown that fires meanwhile.
    async fn observe<T>(&mut self, step: impl Future<Output = T>) -> T {
        tokio::pin!(step);
        if !self.fired {
            tokio::select! {
                biased;
                () = &mut self.signal => self.fired = true,
                value = &mut step => return value,
            }
        }
        step.await
    }

    /// Completes when shutdown fires. Never completes once it has fired.
    async fn wait(&mut self) {
        if self.fired {
            return std::future::pending().await;
        }
        (&mut self.signal).await;
        self.fired = true;
    }
}

/// Runs sandbox sessions against an engine.
pub struct SessionOrchestrator {
    engine: Arc<dyn Engine>,
    terminal: TerminalController,
    references: Arc<dyn ReferenceGenerator>,
    options: SessionOptions,
    io: Option<SessionIo>,
}

impl SessionOrchestrator {
    /// Create an orchestrator wired to the process's standard streams.
    pub fn new(
        engine: Arc<dyn Engine>,
        terminal: Box<dyn TerminalControl>,
        options: SessionOptions,
    ) -> Self {
        Self {
            engine,
            terminal: TerminalController::new(terminal),
            references: Arc::new(UuidReferenceGenerator),
            options,
            io: None,
        }
    }

    /// Use a different source of commit tag suffixes.
    pub fn with_reference_generator(mut self, references: Arc<dyn ReferenceGenerator>) -> Self {
        self.references = references;
        self
    }

    /// Use the given local streams instead of stdio.
    pub fn with_io(mut self, io: SessionIo) -> Self {
        self.io = Some(io);
        self
    }

    /// Run a session to completion.
    pub async fn run(self, request: SessionRequest) -> SessionOutcome {
        self.run_until(request, std::future::pending()).await
    }

    /// Run a session, winding it down early if `shutdown` completes.
    ///
    /// `shutdown` is watched from the first engine call on. Once it fires
    /// the session is not committed; whatever was created is stopped with
    /// [`SessionOptions::stop_timeout_secs`] grace and removed, and the
    /// outcome's primary error is [`SandboxError::Interrupted`].
    pub async fn run_until<F>(mut self, request: SessionRequest, shutdown: F) -> SessionOutcome
    where
        F: Future<Output = ()> + Send,
    {
        let mut run = SessionRun::new(SandboxSession::new(&request.name, &request.image));
        info!(
            "Starting sandbox session {} from image {}",
            request.name, request.image
        );

        let mut shutdown = ShutdownWatch::new(shutdown);
        self.drive(&mut run, &request, &mut shutdown).await;
        self.close(run)
    }

    async fn drive(
        &mut self,
        run: &mut SessionRun,
        request: &SessionRequest,
        shutdown: &mut ShutdownWatch<'_>,
    ) {
        let spec = match shutdown.guard(self.prepare(run, request)).await {
            Some(Ok(spec)) => spec,
            Some(Err(e)) => return run.fail(e),
            None => return run.fail(SandboxError::Interrupted),
        };

        self.announce(format!(
            "Start container {}  <- from image: {}",
            request.name, request.image
        ));
        // An abandoned create could leave a container we cannot name, so it
        // always runs to completion.
        let id = match shutdown.observe(self.engine.create_container(&spec)).await {
            Ok(id) => id,
            Err(e) => {
                return run.fail(SandboxError::ContainerCreateFailed {
                    name: spec.name.clone(),
                    reason: e.to_string(),
                });
            }
        };
        info!("Created container {} ({})", spec.name, id);
        run.session.container_id = Some(id.clone());
        run.session.transition(SessionState::Created);
        if shutdown.fired() {
            run.fail(SandboxError::Interrupted);
            return self.remove(run, &id).await;
        }
        self.announce(format!("Done, {} container created", request.name));

        match shutdown.guard(self.engine.start_container(&id)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                run.fail(SandboxError::ContainerStartFailed {
                    id: id.clone(),
                    reason: e.to_string(),
                });
                return self.remove(run, &id).await;
            }
            None => {
                run.fail(SandboxError::Interrupted);
                self.stop(run, &id).await;
                return self.remove(run, &id).await;
            }
        }
        run.session.transition(SessionState::Started);
        self.announce(format!(
            "{} is starting, attaching to terminal...",
            request.name
        ));

        let attach = AttachSpec::interactive(&self.options.detach_keys);
        let stream = match shutdown
            .guard(self.engine.attach_container(&id, &attach))
            .await
        {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                run.fail(SandboxError::ContainerAttachFailed {
                    id: id.clone(),
                    reason: e.to_string(),
                });
                self.stop(run, &id).await;
                return self.remove(run, &id).await;
            }
            None => {
                run.fail(SandboxError::Interrupted);
                self.stop(run, &id).await;
                return self.remove(run, &id).await;
            }
        };
        run.session.transition(SessionState::Attached);

        // In cooked mode the detach byte would be eaten as end-of-file, so an
        // interactive session cannot run without raw mode.
        let interactive = self.terminal.is_interactive();
        match self.terminal.activate() {
            Ok(raw) => run.session.holds_terminal = raw,
            Err(e) => {
                run.fail(e);
                drop(stream);
                self.stop(run, &id).await;
                return self.remove(run, &id).await;
            }
        }

        let detach = StopHandle::new(self.engine.clone(), &id, DETACH_STOP_GRACE_SECS);
        let interrupt = StopHandle::new(
            self.engine.clone(),
            &id,
            self.options.stop_timeout_secs,
        );
        let io = self.io.take().unwrap_or_else(SessionIo::stdio);
        let mut pump = DuplexPump::launch(stream, io, detach, true);
        run.session.transition(SessionState::Running);

        let waited = self
            .wait_for_exit(run, &id, &mut pump, &interrupt, shutdown)
            .await;
        let interrupted = shutdown.fired();

        for event in pump.finish(self.options.drain_timeout).await {
            self.absorb(run, event, false);
        }
        if let Err(e) = self.terminal.restore() {
            run.record(e);
        }

        match waited {
            Ok(code) => {
                debug!("Container {} exited with status {}", id, code);
                run.session.transition(SessionState::Stopped);
            }
            Err(e) => {
                run.fail(e);
                return self.remove(run, &id).await;
            }
        }

        if interrupted {
            debug!("Skipping commit of interrupted session {}", request.name);
        } else if self.options.should_commit(interactive) {
            self.commit(run, &id).await;
        } else {
            debug!("Commit disabled for session {}", request.name);
        }

        self.remove(run, &id).await;
    }

    /// Validate inputs before anything is created on the engine.
    async fn prepare(&self, run: &mut SessionRun, request: &SessionRequest) -> Result<ContainerSpec> {
        let mounts = parse_mount_specs(&request.mounts)?;
        run.session.mounts = mounts.clone();

        let images = self
            .engine
            .list_images()
            .await
            .map_err(|e| SandboxError::ImageListFailed(e.to_string()))?;
        ensure_image_present(&request.image, &images)?;

        ContainerSpec::for_session(&request.name, &request.image, mounts, &self.options)
    }

    /// Block until the container is not running.
    ///
    /// Pump completions are absorbed while waiting. An input failure before
    /// exit marks the session failed and stops the container, as does a
    /// shutdown; both use the configured grace and keep waiting for exit.
    async fn wait_for_exit(
        &self,
        run: &mut SessionRun,
        id: &str,
        pump: &mut DuplexPump,
        interrupt: &StopHandle,
        shutdown: &mut ShutdownWatch<'_>,
    ) -> Result<i64> {
        let mut wait = self.engine.wait_container(id);

        loop {
            tokio::select! {
                waited = &mut wait => {
                    return waited.map_err(|e| SandboxError::ContainerWaitFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    });
                }
                () = shutdown.wait() => {
                    run.abort_with(SandboxError::Interrupted);
                    if let Err(e) = interrupt.request().await {
                        run.record(e);
                    }
                }
                Some(event) = pump.next_event(), if !pump.is_empty() => {
                    if self.absorb(run, event, true)
                        && let Err(e) = interrupt.request().await
                    {
                        run.record(e);
                    }
                }
            }
        }
    }

    /// Fold a finished pump task into the run.
    ///
    /// Returns true if the event failed a running session, which then needs
    /// its container stopped.
    fn absorb(&self, run: &mut SessionRun, event: PumpEvent, running: bool) -> bool {
        match event {
            PumpEvent::Input(Ok(report)) => debug!(
                "Input forwarding ended: {} bytes, detached: {}",
                report.forwarded, report.detached
            ),
            PumpEvent::Output(Ok(bytes)) => debug!("Output forwarding ended: {} bytes", bytes),
            PumpEvent::Input(Err(
                e @ SandboxError::StreamIOFailed {
                    direction: StreamDirection::Input,
                    ..
                },
            )) if running => {
                run.abort_with(e);
                return true;
            }
            PumpEvent::Input(Err(e)) | PumpEvent::Output(Err(e)) => run.record(e),
        }
        false
    }

    async fn stop(&self, run: &mut SessionRun, id: &str) {
        if let Err(e) = self
            .engine
            .stop_container(id, self.options.stop_timeout_secs)
            .await
        {
            run.record(SandboxError::ContainerStopFailed {
                id: id.to_string(),
                reason: e.to_string(),
            });
        }
    }

    async fn commit(&self, run: &mut SessionRun, id: &str) {
        let name = run.session.name.clone();
        let suffix = self.references.next_suffix();
        let reference = commit_reference(&name, &suffix);

        match self.engine.commit_container(id, &name, &suffix).await {
            Ok(image_id) => {
                info!("Committed container {} as {} ({})", id, reference, image_id);
                run.session.transition(SessionState::Committed);
                self.announce(format!(
                    "\nContainer {} saved to image -> {}",
                    name, reference
                ));
                run.final_image = Some(reference);
            }
            Err(e) => run.record(SandboxError::ContainerCommitFailed {
                id: id.to_string(),
                reference,
                reason: e.to_string(),
            }),
        }
    }

    /// Force-remove the container. Attempted once, never retried.
    async fn remove(&self, run: &mut SessionRun, id: &str) {
        self.announce(format!("Removing {} container...", run.session.name));
        match self.engine.remove_container(id, true).await {
            Ok(()) => {
                info!("Removed container {}", id);
                if run.session.visited(SessionState::Stopped) {
                    run.session.transition(SessionState::Removed);
                }
            }
            Err(e) => run.record(SandboxError::ContainerRemoveFailed {
                id: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Restore the terminal if still changed and compose the outcome.
    fn close(mut self, mut run: SessionRun) -> SessionOutcome {
        if let Err(e) = self.terminal.restore() {
            run.record(e);
        }

        if run.primary.is_some() {
            if run.session.state != SessionState::Error {
                run.session.transition(SessionState::Error);
            }
        } else {
            run.session.transition(SessionState::Closed);
        }

        SessionOutcome {
            final_image: run.final_image,
            primary_error: run.primary,
            teardown_errors: run.teardown,
            session: run.session,
        }
    }

    fn announce(&self, message: String) {
        if self.options.announce {
            println!("{}", message);
        }
    }
}
