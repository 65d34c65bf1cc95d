//! Rcon coordinator - Serializes remote console commands
//!
//! Commands go through one ordered queue drained by a single worker. The
//! worker sends a command, collects every Rcon output line until the RconEnd
//! carrying the same command string arrives, hands the lines back, and only
//! then sends the next command.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::network::SessionError;
use crate::protocol::ResponsePacket;

/// Rcon errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RconError {
    #[error("Rcon command contains a NUL byte")]
    InvalidCommand,

    #[error("Rcon worker has stopped")]
    WorkerStopped,
}

pub type RconResult<T> = Result<T, RconError>;

/// One line of console output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RconLine {
    pub colour: u16,
    pub output: String,
}

/// Where the worker sends commands
#[async_trait]
pub trait RconSink: Send + Sync {
    async fn send_rcon(&self, command: &str) -> Result<(), SessionError>;
}

struct RconRequest {
    command: String,
    reply: Option<oneshot::Sender<Vec<RconLine>>>,
}

#[derive(Debug)]
enum RconOutput {
    Line(RconLine),
    End(String),
    /// The connection went away; retire the in-flight request
    Aborted,
}

type Receivers = (
    mpsc::UnboundedReceiver<RconRequest>,
    mpsc::UnboundedReceiver<RconOutput>,
);

pub struct RconCoordinator {
    requests: mpsc::UnboundedSender<RconRequest>,
    output: mpsc::UnboundedSender<RconOutput>,
    pending: Mutex<Option<Receivers>>,
}

impl RconCoordinator {
    pub fn new() -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (output, output_rx) = mpsc::unbounded_channel();
        Self {
            requests,
            output,
            pending: Mutex::new(Some((request_rx, output_rx))),
        }
    }

    /// Spawn the worker; later calls do nothing and return false
    pub fn start(&self, sink: Arc<dyn RconSink>) -> bool {
        let receivers = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        match receivers {
            Some((requests, output)) => {
                tokio::spawn(run_worker(sink, requests, output));
                true
            }
            None => false,
        }
    }

    fn enqueue(&self, command: String, reply: Option<oneshot::Sender<Vec<RconLine>>>) -> RconResult<()> {
        if command.contains('\0') {
            return Err(RconError::InvalidCommand);
        }
        self.requests
            .send(RconRequest { command, reply })
            .map_err(|_| RconError::WorkerStopped)
    }

    /// Queue a command without waiting for its output
    pub fn submit(&self, command: impl Into<String>) -> RconResult<()> {
        self.enqueue(command.into(), None)
    }

    /// Queue a command and wait for all of its output
    pub async fn submit_sync(&self, command: impl Into<String>) -> RconResult<Vec<RconLine>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(command.into(), Some(tx))?;
        rx.await.map_err(|_| RconError::WorkerStopped)
    }

    /// Pass Rcon and RconEnd packets to the worker; other packets are ignored
    pub fn feed(&self, packet: &ResponsePacket) {
        let output = match packet {
            ResponsePacket::Rcon { colour, output } => RconOutput::Line(RconLine {
                colour: *colour,
                output: output.clone(),
            }),
            ResponsePacket::RconEnd { command } => RconOutput::End(command.clone()),
            _ => return,
        };
        let _ = self.output.send(output);
    }

    /// Retire the in-flight request with an empty result
    pub fn abort_in_flight(&self) {
        let _ = self.output.send(RconOutput::Aborted);
    }
}

impl Default for RconCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(
    sink: Arc<dyn RconSink>,
    mut requests: mpsc::UnboundedReceiver<RconRequest>,
    mut output: mpsc::UnboundedReceiver<RconOutput>,
) {
    tracing::debug!("Rcon worker started");

    while let Some(request) = requests.recv().await {
        // leftovers from a request that was torn down
        while let Ok(stale) = output.try_recv() {
            tracing::debug!("Discarding stale rcon output: {:?}", stale);
        }

        if let Err(e) = sink.send_rcon(&request.command).await {
            tracing::warn!("Failed to send rcon command '{}': {}", request.command, e);
            if let Some(reply) = request.reply {
                let _ = reply.send(Vec::new());
            }
            continue;
        }

        let mut lines = Vec::new();
        loop {
            match output.recv().await {
                Some(RconOutput::Line(line)) => lines.push(line),
                Some(RconOutput::End(command)) if command == request.command => break,
                Some(RconOutput::End(command)) => {
                    tracing::debug!("Ignoring RconEnd for '{}' while waiting on '{}'", command, request.command);
                }
                Some(RconOutput::Aborted) => {
                    tracing::info!("Rcon command '{}' aborted by disconnect", request.command);
                    lines.clear();
                    break;
                }
                None => return,
            }
        }

        tracing::debug!("Rcon command '{}' finished with {} lines", request.command, lines.len());
        if let Some(reply) = request.reply {
            let _ = reply.send(lines);
        }
    }

    tracing::debug!("Rcon worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct ChannelSink {
        sent: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl RconSink for ChannelSink {
        async fn send_rcon(&self, command: &str) -> Result<(), SessionError> {
            let _ = self.sent.send(command.to_string());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl RconSink for FailingSink {
        async fn send_rcon(&self, _command: &str) -> Result<(), SessionError> {
            Err(SessionError::NotConnected)
        }
    }

    fn started() -> (Arc<RconCoordinator>, mpsc::UnboundedReceiver<String>) {
        let (sent, sent_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(RconCoordinator::new());
        assert!(coordinator.start(Arc::new(ChannelSink { sent })));
        (coordinator, sent_rx)
    }

    fn line(text: &str) -> ResponsePacket {
        ResponsePacket::Rcon { colour: 1, output: text.into() }
    }

    fn end(command: &str) -> ResponsePacket {
        ResponsePacket::RconEnd { command: command.into() }
    }

    async fn next_sent(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_sync_collects_until_matching_end() {
        let (coordinator, mut sent) = started();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.submit_sync("say hi").await })
        };

        assert_eq!(next_sent(&mut sent).await, "say hi");
        coordinator.feed(&line("first"));
        coordinator.feed(&line("second"));
        coordinator.feed(&end("say hi"));

        let lines = waiter.await.unwrap().unwrap();
        let text: Vec<_> = lines.iter().map(|l| l.output.as_str()).collect();
        assert_eq!(text, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_commands_are_serialized() {
        let (coordinator, mut sent) = started();

        coordinator.submit("pause").unwrap();
        let second = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.submit_sync("unpause").await })
        };

        assert_eq!(next_sent(&mut sent).await, "pause");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sent.try_recv().is_err(), "second command sent before first finished");

        coordinator.feed(&end("pause"));
        assert_eq!(next_sent(&mut sent).await, "unpause");
        coordinator.feed(&line("done"));
        coordinator.feed(&end("unpause"));

        assert_eq!(second.await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_end_is_ignored() {
        let (coordinator, mut sent) = started();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.submit_sync("companies").await })
        };

        next_sent(&mut sent).await;
        coordinator.feed(&line("a"));
        coordinator.feed(&end("clients"));
        coordinator.feed(&line("b"));
        coordinator.feed(&end("companies"));

        assert_eq!(waiter.await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_abort_returns_empty() {
        let (coordinator, mut sent) = started();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.submit_sync("status").await })
        };

        next_sent(&mut sent).await;
        coordinator.feed(&line("partial"));
        coordinator.abort_in_flight();

        assert!(waiter.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_returns_empty() {
        let coordinator = RconCoordinator::new();
        coordinator.start(Arc::new(FailingSink));
        assert!(coordinator.submit_sync("status").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_only_once() {
        let (coordinator, _sent) = started();
        assert!(!coordinator.start(Arc::new(FailingSink)));
    }

    #[test]
    fn test_rejects_nul() {
        let coordinator = RconCoordinator::new();
        assert_eq!(coordinator.submit("say\0x"), Err(RconError::InvalidCommand));
    }
}
