//! Interactive stream forwarding.
//!
//! While a session runs, [`DuplexPump`] copies container output to the local
//! stdout/stderr and local keystrokes to the container, one byte at a time.
//! The detach byte ([`DETACH_SENTINEL`]) ends forwarding and asks the engine
//! to stop the container. Both copies live in a session-scoped task group
//! that the orchestrator joins during teardown.

use crate::container::{
    AttachedStream, Engine, OutputChunk, Result, SandboxError, StreamDirection,
};
use futures::stream::{BoxStream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// End-of-transmission byte (Ctrl-D) that detaches from the session.
pub const DETACH_SENTINEL: u8 = 0x04;

/// Grace period of the stop request issued on detach.
pub const DETACH_STOP_GRACE_SECS: i32 = 0;

/// Written once after attaching so the shell re-prints its prompt.
const PROMPT_FLUSH: &[u8] = b"\n";

/// Local byte source.
pub type LocalInput = Box<dyn AsyncRead + Unpin + Send>;

/// Local byte sink.
pub type LocalOutput = Box<dyn AsyncWrite + Unpin + Send>;

/// Local standard streams a session is wired to.
pub struct SessionIo {
    pub stdin: LocalInput,
    pub stdout: LocalOutput,
    pub stderr: LocalOutput,
}

impl SessionIo {
    /// The process's own standard streams.
    pub fn stdio() -> Self {
        Self {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

/// Issues the stop request for the session's container.
#[derive(Clone)]
pub struct StopHandle {
    engine: Arc<dyn Engine>,
    container_id: String,
    timeout_secs: i32,
}

impl StopHandle {
    pub fn new(engine: Arc<dyn Engine>, container_id: &str, timeout_secs: i32) -> Self {
        Self {
            engine,
            container_id: container_id.to_string(),
            timeout_secs,
        }
    }

    /// Ask the engine to stop the container.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ContainerStopFailed`] if the engine rejects it.
    pub async fn request(&self) -> Result<()> {
        debug!(
            "Requesting stop of {} with {}s grace",
            self.container_id, self.timeout_secs
        );
        self.engine
            .stop_container(&self.container_id, self.timeout_secs)
            .await
            .map_err(|e| SandboxError::ContainerStopFailed {
                id: self.container_id.clone(),
                reason: e.to_string(),
            })
    }
}

/// What the input task did before it ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputReport {
    /// Bytes forwarded to the container, excluding the prompt flush
    pub forwarded: u64,
    /// The detach byte was read
    pub detached: bool,
}

/// Completion of one pump task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEvent {
    /// Output copy ended with the number of bytes written locally
    Output(Result<u64>),
    /// Input copy ended
    Input(Result<InputReport>),
}

/// Running output and input copies for one session.
pub struct DuplexPump {
    tasks: JoinSet<PumpEvent>,
    output_task: tokio::task::Id,
}

impl DuplexPump {
    /// Spawn the output and input tasks over an attached stream.
    ///
    /// The output task is spawned first. When `flush_prompt` is set, the input
    /// task writes one newline to the container before reading local input.
    pub fn launch(stream: AttachedStream, io: SessionIo, stop: StopHandle, flush_prompt: bool) -> Self {
        let AttachedStream { output, input } = stream;
        let SessionIo {
            stdin,
            stdout,
            stderr,
        } = io;

        let mut tasks = JoinSet::new();
        let output_task = tasks
            .spawn(async move { PumpEvent::Output(forward_output(output, stdout, stderr).await) })
            .id();
        tasks.spawn(async move {
            PumpEvent::Input(forward_input(stdin, input, stop, flush_prompt).await)
        });

        Self { tasks, output_task }
    }

    /// Whether any task is still running or unjoined.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next task to finish.
    ///
    /// Returns `None` once every task has been joined.
    pub async fn next_event(&mut self) -> Option<PumpEvent> {
        loop {
            let joined = self.tasks.join_next().await?;
            if let Some(event) = self.absorb(joined) {
                return Some(event);
            }
        }
    }

    /// Give remaining tasks `drain` to finish, then abort and join them.
    pub async fn finish(mut self, drain: Duration) -> Vec<PumpEvent> {
        let mut events = Vec::new();

        let drained = tokio::time::timeout(drain, async {
            while let Some(event) = self.next_event().await {
                events.push(event);
            }
        })
        .await;

        if drained.is_err() {
            debug!("Aborting {} pump task(s) after drain timeout", self.tasks.len());
            self.tasks.abort_all();
            while let Some(event) = self.next_event().await {
                events.push(event);
            }
        }

        events
    }

    fn absorb(&self, joined: std::result::Result<PumpEvent, JoinError>) -> Option<PumpEvent> {
        match joined {
            Ok(event) => Some(event),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                let output = e.id() == self.output_task;
                let error = SandboxError::StreamIOFailed {
                    direction: if output {
                        StreamDirection::Output
                    } else {
                        StreamDirection::Input
                    },
                    reason: format!("pump task panicked: {}", e),
                };
                if output {
                    Some(PumpEvent::Output(Err(error)))
                } else {
                    Some(PumpEvent::Input(Err(error)))
                }
            }
        }
    }
}

fn stream_failed<E: std::fmt::Display>(direction: StreamDirection, e: E) -> SandboxError {
    SandboxError::StreamIOFailed {
        direction,
        reason: e.to_string(),
    }
}

async fn write_chunk(sink: &mut LocalOutput, bytes: &[u8]) -> std::io::Result<()> {
    sink.write_all(bytes).await?;
    sink.flush().await
}

/// Copy container output to the local sinks until the stream ends.
async fn forward_output(
    mut output: BoxStream<'static, std::result::Result<OutputChunk, crate::container::EngineError>>,
    mut stdout: LocalOutput,
    mut stderr: LocalOutput,
) -> Result<u64> {
    let mut written = 0u64;

    while let Some(chunk) = output.next().await {
        let chunk = chunk.map_err(|e| stream_failed(StreamDirection::Output, e))?;
        let (sink, bytes) = match &chunk {
            OutputChunk::Stdout(bytes) => (&mut stdout, bytes),
            OutputChunk::Stderr(bytes) => (&mut stderr, bytes),
        };
        write_chunk(sink, bytes)
            .await
            .map_err(|e| stream_failed(StreamDirection::Output, e))?;
        written += bytes.len() as u64;
    }

    debug!("Container output closed after {} bytes", written);
    Ok(written)
}

/// Forward local input byte by byte until detach, EOF, or failure.
///
/// A failure here leaves the user unable to reach the container, so it also
/// requests a stop to let the session wind down.
async fn forward_input(
    mut stdin: LocalInput,
    mut input: Pin<Box<dyn AsyncWrite + Send>>,
    stop: StopHandle,
    flush_prompt: bool,
) -> Result<InputReport> {
    let mut report = InputReport::default();

    if flush_prompt {
        if let Err(e) = write_all_flush(&mut input, PROMPT_FLUSH).await {
            return abort_on_input_failure(&stop, e).await;
        }
    }

    let mut byte = [0u8; 1];
    loop {
        match stdin.read(&mut byte).await {
            Ok(0) => {
                debug!("Local input closed after {} bytes", report.forwarded);
                if let Err(e) = input.shutdown().await {
                    debug!("Closing container stdin failed: {}", e);
                }
                return Ok(report);
            }
            Ok(_) if byte[0] == DETACH_SENTINEL => {
                info!("Detach requested, stopping container");
                report.detached = true;
                stop.request().await?;
                return Ok(report);
            }
            Ok(_) => {
                if let Err(e) = write_all_flush(&mut input, &byte).await {
                    return abort_on_input_failure(&stop, e).await;
                }
                report.forwarded += 1;
            }
            Err(e) => return abort_on_input_failure(&stop, e).await,
        }
    }
}

async fn write_all_flush(
    input: &mut Pin<Box<dyn AsyncWrite + Send>>,
    bytes: &[u8],
) -> std::io::Result<()> {
    input.write_all(bytes).await?;
    input.flush().await
}

async fn abort_on_input_failure(stop: &StopHandle, e: std::io::Error) -> Result<InputReport> {
    warn!("Input forwarding failed: {}", e);
    if let Err(stop_err) = stop.request().await {
        warn!("{}", stop_err);
    }
    Err(stream_failed(StreamDirection::Input, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{AttachSpec, ContainerSpec, EngineError, ImageInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl AsyncWrite for SharedBuffer {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Engine that only records stop requests.
    #[derive(Default)]
    struct StopRecorder {
        stops: Mutex<Vec<(String, i32)>>,
    }

    #[async_trait]
    impl Engine for StopRecorder {
        async fn list_images(&self) -> std::result::Result<Vec<ImageInfo>, EngineError> {
            Ok(Vec::new())
        }
        async fn create_container(
            &self,
            _spec: &ContainerSpec,
        ) -> std::result::Result<String, EngineError> {
            Err(EngineError::Other("unused".to_string()))
        }
        async fn start_container(&self, _id: &str) -> std::result::Result<(), EngineError> {
            Ok(())
        }
        async fn attach_container(
            &self,
            _id: &str,
            _spec: &AttachSpec,
        ) -> std::result::Result<AttachedStream, EngineError> {
            Err(EngineError::Other("unused".to_string()))
        }
        async fn wait_container(&self, _id: &str) -> std::result::Result<i64, EngineError> {
            Ok(0)
        }
        async fn stop_container(
            &self,
            id: &str,
            timeout_secs: i32,
        ) -> std::result::Result<(), EngineError> {
            self.stops.lock().unwrap().push((id.to_string(), timeout_secs));
            Ok(())
        }
        async fn commit_container(
            &self,
            _id: &str,
            _repo: &str,
            _tag: &str,
        ) -> std::result::Result<String, EngineError> {
            Ok(String::new())
        }
        async fn remove_container(
            &self,
            _id: &str,
            _force: bool,
        ) -> std::result::Result<(), EngineError> {
            Ok(())
        }
    }

    fn attached(
        chunks: Vec<std::result::Result<OutputChunk, EngineError>>,
        input: SharedBuffer,
    ) -> AttachedStream {
        AttachedStream {
            output: futures::stream::iter(chunks).boxed(),
            input: Box::pin(input),
        }
    }

    #[tokio::test]
    async fn test_detach_stops_forwarding() {
        let engine = Arc::new(StopRecorder::default());
        let container_input = SharedBuffer::default();
        let io = SessionIo {
            stdin: Box::new(&b"hello\x04world"[..]),
            stdout: Box::new(SharedBuffer::default()),
            stderr: Box::new(SharedBuffer::default()),
        };

        let pump = DuplexPump::launch(
            attached(Vec::new(), container_input.clone()),
            io,
            StopHandle::new(engine.clone(), "c1", 0),
            false,
        );
        let events = pump.finish(Duration::from_secs(5)).await;

        assert_eq!(container_input.contents(), b"hello");
        assert_eq!(*engine.stops.lock().unwrap(), vec![("c1".to_string(), 0)]);
        assert!(events.contains(&PumpEvent::Input(Ok(InputReport {
            forwarded: 5,
            detached: true,
        }))));
    }

    #[tokio::test]
    async fn test_prompt_flush_precedes_input() {
        let engine = Arc::new(StopRecorder::default());
        let container_input = SharedBuffer::default();
        let io = SessionIo {
            stdin: Box::new(&b"ls"[..]),
            stdout: Box::new(SharedBuffer::default()),
            stderr: Box::new(SharedBuffer::default()),
        };

        let pump = DuplexPump::launch(
            attached(Vec::new(), container_input.clone()),
            io,
            StopHandle::new(engine.clone(), "c1", 0),
            true,
        );
        pump.finish(Duration::from_secs(5)).await;

        assert_eq!(container_input.contents(), b"\nls");
        assert!(engine.stops.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_output_routed_by_stream() {
        let engine = Arc::new(StopRecorder::default());
        let stdout = SharedBuffer::default();
        let stderr = SharedBuffer::default();
        let io = SessionIo {
            stdin: Box::new(tokio::io::empty()),
            stdout: Box::new(stdout.clone()),
            stderr: Box::new(stderr.clone()),
        };
        let chunks = vec![
            Ok(OutputChunk::Stdout(b"out ".to_vec())),
            Ok(OutputChunk::Stderr(b"err".to_vec())),
            Ok(OutputChunk::Stdout(b"put".to_vec())),
        ];

        let pump = DuplexPump::launch(
            attached(chunks, SharedBuffer::default()),
            io,
            StopHandle::new(engine, "c1", 0),
            false,
        );
        let events = pump.finish(Duration::from_secs(5)).await;

        assert_eq!(stdout.contents(), b"out put");
        assert_eq!(stderr.contents(), b"err");
        assert!(events.contains(&PumpEvent::Output(Ok(10))));
    }

    #[tokio::test]
    async fn test_output_failure_keeps_input_running() {
        let engine = Arc::new(StopRecorder::default());
        let container_input = SharedBuffer::default();
        let io = SessionIo {
            stdin: Box::new(&b"abc"[..]),
            stdout: Box::new(BrokenSink),
            stderr: Box::new(SharedBuffer::default()),
        };

        let pump = DuplexPump::launch(
            attached(
                vec![Ok(OutputChunk::Stdout(b"x".to_vec()))],
                container_input.clone(),
            ),
            io,
            StopHandle::new(engine, "c1", 0),
            false,
        );
        let events = pump.finish(Duration::from_secs(5)).await;

        assert_eq!(container_input.contents(), b"abc");
        assert!(events.iter().any(|e| matches!(
            e,
            PumpEvent::Output(Err(SandboxError::StreamIOFailed {
                direction: StreamDirection::Output,
                ..
            }))
        )));
    }

    #[tokio::test]
    async fn test_input_failure_requests_stop() {
        let engine = Arc::new(StopRecorder::default());
        let io = SessionIo {
            stdin: Box::new(&b"a"[..]),
            stdout: Box::new(SharedBuffer::default()),
            stderr: Box::new(SharedBuffer::default()),
        };
        let stream = AttachedStream {
            output: futures::stream::empty().boxed(),
            input: Box::pin(BrokenSink),
        };

        let pump = DuplexPump::launch(stream, io, StopHandle::new(engine.clone(), "c1", 0), false);
        let events = pump.finish(Duration::from_secs(5)).await;

        assert_eq!(engine.stops.lock().unwrap().len(), 1);
        let input_error = events.iter().find_map(|e| match e {
            PumpEvent::Input(Err(err)) => Some(err.clone()),
            _ => None,
        });
        assert!(matches!(
            input_error,
            Some(SandboxError::StreamIOFailed {
                direction: StreamDirection::Input,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_panicked_task_reported_with_its_direction() {
        let engine = Arc::new(StopRecorder::default());
        let io = SessionIo {
            stdin: Box::new(tokio::io::empty()),
            stdout: Box::new(SharedBuffer::default()),
            stderr: Box::new(SharedBuffer::default()),
        };
        let output = futures::stream::poll_fn(
            |_cx| -> Poll<Option<std::result::Result<OutputChunk, EngineError>>> {
                panic!("output stream exploded")
            },
        );
        let stream = AttachedStream {
            output: output.boxed(),
            input: Box::pin(SharedBuffer::default()),
        };

        let pump = DuplexPump::launch(stream, io, StopHandle::new(engine, "c1", 0), false);
        let events = pump.finish(Duration::from_secs(5)).await;

        assert!(events.iter().any(|e| matches!(
            e,
            PumpEvent::Output(Err(SandboxError::StreamIOFailed {
                direction: StreamDirection::Output,
                ..
            }))
        )));
        assert!(events.contains(&PumpEvent::Input(Ok(InputReport::default()))));
    }

    #[tokio::test]
    async fn test_finish_aborts_blocked_input() {
        let engine = Arc::new(StopRecorder::default());
        let (_keep_open, local_stdin) = tokio::io::duplex(8);
        let io = SessionIo {
            stdin: Box::new(local_stdin),
            stdout: Box::new(SharedBuffer::default()),
            stderr: Box::new(SharedBuffer::default()),
        };

        let pump = DuplexPump::launch(
            attached(Vec::new(), SharedBuffer::default()),
            io,
            StopHandle::new(engine.clone(), "c1", 0),
            false,
        );
        let events = pump.finish(Duration::from_millis(20)).await;

        // Output ended on its own; the input task was cancelled.
        assert_eq!(events, vec![PumpEvent::Output(Ok(0))]);
        assert!(engine.stops.lock().unwrap().is_empty());
    }
}
