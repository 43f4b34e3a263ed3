//! In-memory DAP client for driving a [`DapServer`] end to end
//!
//! The client speaks the real wire format over a `tokio::io::duplex` pipe.
//! Responses may arrive out of request order (launch answers late) and
//! events interleave with them, so everything read is buffered until a
//! test asks for it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use crate::adapter::DapServer;
use crate::backend::Backend;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::dap::codec;

/// How long any single wait may take before the test fails
const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    next_seq: i64,
    responses: HashMap<i64, Value>,
    events: VecDeque<Value>,
    server: Option<JoinHandle<Result<()>>>,
}

impl TestClient {
    /// Spawn a server for `backend` and connect to it
    pub fn start(backend: Arc<dyn Backend>, config: Config) -> Self {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let (server_reader, server_writer) = tokio::io::split(server_io);
        let server = DapServer::new(backend, config);
        let handle = tokio::spawn(server.run(server_reader, server_writer));

        let (reader, writer) = tokio::io::split(client_io);
        Self {
            reader: BufReader::new(reader),
            writer,
            next_seq: 1,
            responses: HashMap::new(),
            events: VecDeque::new(),
            server: Some(handle),
        }
    }

    /// Send a request without waiting, returning its sequence number
    pub async fn send(&mut self, command: &str, arguments: Value) -> Result<i64> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut message = json!({ "seq": seq, "type": "request", "command": command });
        if !arguments.is_null() {
            message["arguments"] = arguments;
        }
        codec::write_message(&mut self.writer, &message.to_string()).await?;
        Ok(seq)
    }

    /// Send a request and wait for its response
    pub async fn request(&mut self, command: &str, arguments: Value) -> Result<Value> {
        let seq = self.send(command, arguments).await?;
        self.response(seq).await
    }

    /// Wait for the response to request `seq`
    pub async fn response(&mut self, seq: i64) -> Result<Value> {
        loop {
            if let Some(response) = self.responses.remove(&seq) {
                return Ok(response);
            }
            self.read_one().await?;
        }
    }

    /// Whether the response to `seq` has already arrived, without waiting
    pub fn has_response(&self, seq: i64) -> bool {
        self.responses.contains_key(&seq)
    }

    /// Wait for the next event named `name`, leaving other events buffered
    pub async fn event(&mut self, name: &str) -> Result<Value> {
        loop {
            if let Some(index) = self.events.iter().position(|e| e["event"] == name) {
                if let Some(event) = self.events.remove(index) {
                    return Ok(event);
                }
            }
            self.read_one().await?;
        }
    }

    /// Wait for the next event of any kind, in arrival order
    pub async fn next_event(&mut self) -> Result<Value> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }
            self.read_one().await?;
        }
    }

    /// Events received so far and not yet consumed, in arrival order
    pub fn pending_events(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| e["event"].as_str().map(String::from))
            .collect()
    }

    /// Initialize with 1-based lines and columns and consume `initialized`
    pub async fn initialize(&mut self) -> Result<Value> {
        let response = self
            .request(
                "initialize",
                json!({ "clientID": "test", "adapterID": "java", "linesStartAt1": true, "columnsStartAt1": true }),
            )
            .await?;
        self.event("initialized").await?;
        Ok(response)
    }

    /// Wait for the server task to finish
    pub async fn finished(&mut self) -> Result<()> {
        let Some(handle) = self.server.take() else {
            return Ok(());
        };
        tokio::time::timeout(WAIT_LIMIT, handle)
            .await
            .map_err(|_| Error::Internal("server did not stop".to_string()))?
            .map_err(|e| Error::Internal(e.to_string()))?
    }

    async fn read_one(&mut self) -> Result<()> {
        let json = tokio::time::timeout(WAIT_LIMIT, codec::read_message(&mut self.reader))
            .await
            .map_err(|_| Error::Internal("timed out waiting for the server".to_string()))??;
        let message: Value = serde_json::from_str(&json)?;

        match message["type"].as_str() {
            Some("response") => {
                let seq = message["request_seq"].as_i64().unwrap_or_default();
                self.responses.insert(seq, message);
            }
            Some("event") => self.events.push_back(message),
            _ => return Err(Error::DapProtocol(format!("unexpected message: {message}"))),
        }
        Ok(())
    }
}
