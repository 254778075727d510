use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stormdesk_core::protocol::JsonRpcMessage;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};

use super::{send_message, Error, PendingRequests, Transport, TransportHandle, TransportMessage};

/// A `StdioTransport` uses a tool-server child process's stdin/stdout as the
/// wire. A background actor owns the pipes and resolves responses to their
/// pending requests by id; the handle is a channel into that actor.
pub struct StdioActor {
    receiver: mpsc::Receiver<TransportMessage>,
    pending_requests: Arc<PendingRequests>,
    process: Child,
    error_sender: mpsc::Sender<Error>,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl StdioActor {
    pub async fn run(mut self) {
        let incoming = Self::read_responses(self.stdout, Arc::clone(&self.pending_requests));
        let outgoing = Self::write_requests(
            self.receiver,
            self.stdin,
            Arc::clone(&self.pending_requests),
        );

        tokio::pin!(incoming);
        tokio::pin!(outgoing);

        tokio::select! {
            _ = &mut incoming => {
                tracing::debug!("tool server closed its stdout");
            }
            _ = &mut outgoing => {
                tracing::debug!("request channel closed");
            }
            status = self.process.wait() => {
                tracing::debug!(?status, "tool server process exited");
            }
        }

        // Whatever ended the session, drain stderr so the next send can see why
        let mut stderr_buffer = Vec::new();
        if let Ok(bytes) = self.stderr.read_to_end(&mut stderr_buffer).await {
            let detail = if bytes > 0 {
                String::from_utf8_lossy(&stderr_buffer).to_string()
            } else {
                "tool server ended unexpectedly".to_string()
            };

            tracing::info!(stderr = %detail, "tool server terminated");
            let _ = self.error_sender.send(Error::Process(detail)).await;
        }

        self.pending_requests.clear().await;
    }

    async fn read_responses(stdout: ChildStdout, pending_requests: Arc<PendingRequests>) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let message = match serde_json::from_str::<JsonRpcMessage>(&line) {
                        Ok(message) => message,
                        Err(error) => {
                            tracing::warn!(%error, "skipping unparseable frame from tool server");
                            continue;
                        }
                    };

                    tracing::debug!(?message, "received frame");

                    match &message {
                        JsonRpcMessage::Response(response) => {
                            if let Some(id) = response.id {
                                pending_requests.respond(id, Ok(message)).await;
                            }
                        }
                        JsonRpcMessage::Error(error) => {
                            if let Some(id) = error.id {
                                pending_requests.respond(id, Ok(message)).await;
                            }
                        }
                        // server-initiated requests are not part of the tool channel
                        _ => {}
                    }
                }
                Ok(None) => {
                    tracing::debug!("EOF on tool server stdout");
                    break;
                }
                Err(error) => {
                    tracing::error!(%error, "failed reading from tool server");
                    break;
                }
            }
        }
    }

    async fn write_requests(
        mut receiver: mpsc::Receiver<TransportMessage>,
        mut stdin: ChildStdin,
        pending_requests: Arc<PendingRequests>,
    ) {
        while let Some(mut envelope) = receiver.recv().await {
            let mut wire = match serde_json::to_string(&envelope.message) {
                Ok(wire) => wire,
                Err(error) => {
                    if let Some(tx) = envelope.response_tx.take() {
                        let _ = tx.send(Err(Error::Serialization(error)));
                    }
                    continue;
                }
            };
            wire.push('\n');

            tracing::debug!(message = ?envelope.message, "sending frame");

            // register before writing so a fast response cannot race the insert
            if let Some(response_tx) = envelope.response_tx.take() {
                if let JsonRpcMessage::Request(request) = &envelope.message {
                    if let Some(id) = request.id {
                        pending_requests.insert(id, response_tx).await;
                    }
                }
            }

            if let Err(error) = stdin.write_all(wire.as_bytes()).await {
                tracing::error!(%error, "failed writing to tool server stdin");
                pending_requests.clear().await;
                break;
            }

            if let Err(error) = stdin.flush().await {
                tracing::error!(%error, "failed flushing tool server stdin");
                pending_requests.clear().await;
                break;
            }
        }
    }
}

#[derive(Clone)]
pub struct StdioTransportHandle {
    sender: mpsc::Sender<TransportMessage>,
    error_receiver: Arc<Mutex<mpsc::Receiver<Error>>>,
}

#[async_trait]
impl TransportHandle for StdioTransportHandle {
    async fn send(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, Error> {
        let result = send_message(&self.sender, message).await;
        // a process error may have been queued while we waited
        self.check_process_error().await?;
        result
    }
}

impl StdioTransportHandle {
    async fn check_process_error(&self) -> Result<(), Error> {
        match self.error_receiver.lock().await.try_recv() {
            Ok(error) => Err(error),
            Err(_) => Ok(()),
        }
    }
}

pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioTransport {
    pub fn new<S: Into<String>>(
        command: S,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            env,
        }
    }

    async fn spawn_process(&self) -> Result<(Child, ChildStdin, ChildStdout, ChildStderr), Error> {
        let mut command = Command::new(&self.command);
        command
            .envs(&self.env)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // don't inherit signal handling from the parent process
        #[cfg(unix)]
        command.process_group(0);

        #[cfg(windows)]
        command.creation_flags(0x08000000); // CREATE_NO_WINDOW

        let mut process = command
            .spawn()
            .map_err(|e| Error::Process(e.to_string()))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Process("Failed to get stdin".into()))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Process("Failed to get stdout".into()))?;

        let stderr = process
            .stderr
            .take()
            .ok_or_else(|| Error::Process("Failed to get stderr".into()))?;

        Ok((process, stdin, stdout, stderr))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    type Handle = StdioTransportHandle;

    async fn start(&self) -> Result<Self::Handle, Error> {
        let (process, stdin, stdout, stderr) = self.spawn_process().await?;
        let (message_tx, message_rx) = mpsc::channel(32);
        let (error_tx, error_rx) = mpsc::channel(1);

        let actor = StdioActor {
            receiver: message_rx,
            pending_requests: Arc::new(PendingRequests::new()),
            process,
            error_sender: error_tx,
            stdin,
            stdout,
            stderr,
        };

        tokio::spawn(actor.run());

        Ok(StdioTransportHandle {
            sender: message_tx,
            error_receiver: Arc::new(Mutex::new(error_rx)),
        })
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
