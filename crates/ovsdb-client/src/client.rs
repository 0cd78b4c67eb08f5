//! Asynchronous OVSDB JSON-RPC client.
//!
//! One connection is served by two tasks: a writer draining an outgoing
//! queue, and a reader that routes replies to their callers by id, answers
//! `echo` keepalives, and applies monitor data to the [`TableCache`]. Row
//! events are forwarded to a bounded channel handed out by
//! [`OvsDbClient::subscribe`]; when that channel is full the reader waits,
//! which back-pressures the server instead of dropping notifications.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::cache::{Row, RowEvent, TableCache};
use crate::codec::JsonCodec;
use crate::error::{OvsDbError, Result};
use crate::operation::{Operation, OperationResult};

/// Where an OVSDB server listens, in ovs-vsctl notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `unix:<path>`
    Unix(PathBuf),
    /// `tcp:<host>:<port>`
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = OvsDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("unix", path)) if !path.is_empty() => Ok(Endpoint::Unix(PathBuf::from(path))),
            Some(("tcp", addr)) if is_host_port(addr) => Ok(Endpoint::Tcp(addr.to_string())),
            _ => Err(OvsDbError::InvalidEndpoint(s.to_string())),
        }
    }
}

fn is_host_port(addr: &str) -> bool {
    addr.rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Table and columns to monitor. `None` monitors every column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRequest {
    pub table: String,
    pub columns: Option<Vec<String>>,
}

impl MonitorRequest {
    pub fn all_columns(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
        }
    }

    pub fn columns(table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            table: table.into(),
            columns: Some(columns.iter().map(|c| c.to_string()).collect()),
        }
    }
}

trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

struct Pending {
    tx: oneshot::Sender<Result<Value>>,
    /// Reply carries the initial contents of a monitor.
    initial_monitor: bool,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Pending>>,
    cache: RwLock<TableCache>,
    events: Mutex<Option<mpsc::Sender<RowEvent>>>,
    connected: AtomicBool,
}

/// Connection to one OVSDB database.
///
/// Requests may be issued concurrently; replies are matched by id. Monitored
/// tables are mirrored in a local cache readable through [`OvsDbClient::rows`].
pub struct OvsDbClient {
    database: String,
    peer: String,
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Value>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl fmt::Debug for OvsDbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OvsDbClient")
            .field("database", &self.database)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl OvsDbClient {
    /// Connects to `endpoint` and binds the client to `database`.
    #[instrument(skip_all, fields(endpoint = %endpoint, database = %database.as_ref()))]
    pub async fn connect(endpoint: &Endpoint, database: impl AsRef<str>) -> Result<Self> {
        let stream: Box<dyn Transport> = match endpoint {
            Endpoint::Unix(path) => Box::new(UnixStream::connect(path).await?),
            Endpoint::Tcp(addr) => Box::new(TcpStream::connect(addr.as_str()).await?),
        };
        info!("OVSDB session established");
        Ok(Self::with_peer(stream, database.as_ref(), endpoint.to_string()))
    }

    fn with_peer(stream: Box<dyn Transport>, database: &str, peer: String) -> Self {
        let (rd, wr) = tokio::io::split(stream);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            ..Default::default()
        });

        let writer = tokio::spawn(write_loop(
            FramedWrite::new(wr, JsonCodec::default()),
            outgoing_rx,
        ));
        let reader = tokio::spawn(read_loop(
            FramedRead::new(rd, JsonCodec::default()),
            Arc::clone(&shared),
            outgoing.clone(),
        ));

        Self {
            database: database.to_string(),
            peer,
            shared,
            outgoing,
            next_id: AtomicU64::new(0),
            reader,
            writer,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Returns a bounded channel that receives every row event produced by
    /// monitor data from now on. Call before [`Self::monitor`] to also see
    /// the initial rows as `Added` events.
    ///
    /// A second call replaces the previous subscriber.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<RowEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.shared.events.lock() = Some(tx);
        rx
    }

    /// Sends a request and waits for its reply.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.request(method, params, false).await
    }

    async fn request(&self, method: &str, params: Value, initial_monitor: bool) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(id, Pending { tx, initial_monitor });

        // The reader clears `connected` before failing pending requests, so
        // checking after registration cannot miss the disconnect.
        if !self.is_connected() {
            self.shared.pending.lock().remove(&id);
            return Err(OvsDbError::Disconnected);
        }

        let req = json!({"method": method, "params": params, "id": id});
        trace!("OVSDB: sending command {}", req);
        if self.outgoing.send(req).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(OvsDbError::Disconnected);
        }
        rx.await.map_err(|_| OvsDbError::Disconnected)?
    }

    pub async fn list_dbs(&self) -> Result<Vec<String>> {
        let reply = self.call("list_dbs", json!([])).await?;
        reply
            .as_array()
            .map(|dbs| {
                dbs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .ok_or_else(|| OvsDbError::invalid_reply("list_dbs", &reply))
    }

    /// Starts monitoring `requests`. The initial contents are in the cache
    /// by the time this returns.
    #[instrument(skip_all, fields(database = %self.database))]
    pub async fn monitor(&self, requests: &[MonitorRequest]) -> Result<()> {
        let mut tables = Map::new();
        for request in requests {
            let mut select = Map::new();
            if let Some(columns) = &request.columns {
                select.insert("columns".to_string(), json!(columns));
            }
            tables.insert(request.table.clone(), Value::Object(select));
        }
        let params = json!([self.database, self.database, tables]);
        self.request("monitor", params, true).await?;
        info!(
            tables = ?requests.iter().map(|r| r.table.as_str()).collect::<Vec<_>>(),
            "OVSDB monitor started"
        );
        Ok(())
    }

    /// Submits `ops` as one atomic transaction.
    ///
    /// Returns one result per operation; the server may append one extra
    /// result describing a commit failure. Per-operation errors are not
    /// turned into `Err` here.
    pub async fn transact(&self, ops: &[Operation]) -> Result<Vec<OperationResult>> {
        let mut params = Vec::with_capacity(ops.len() + 1);
        params.push(Value::from(self.database.as_str()));
        params.extend(ops.iter().map(Operation::to_value));

        let reply = self.request("transact", Value::Array(params), false).await?;
        let results = reply
            .as_array()
            .ok_or_else(|| OvsDbError::invalid_reply("transact", &reply))?;
        results
            .iter()
            .map(|r| match r {
                Value::Null => Ok(OperationResult::default()),
                r => serde_json::from_value(r.clone()).map_err(OvsDbError::from),
            })
            .collect()
    }

    /// Snapshot of the cached rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<(String, Row)> {
        self.shared.cache.read().rows(table)
    }

    pub fn row(&self, table: &str, uuid: &str) -> Option<Row> {
        self.shared.cache.read().get(table, uuid).cloned()
    }
}

impl Drop for OvsDbClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, JsonCodec>,
    mut outgoing: mpsc::UnboundedReceiver<Value>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outgoing.recv().await {
        if let Err(e) = sink.send(msg).await {
            error!(error = %e, "OVSDB: failed to send message");
            break;
        }
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, JsonCodec>,
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Value>,
) where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(msg) => handle_message(msg, &shared, &outgoing).await,
            Err(e) => {
                error!(error = %e, "OVSDB: failed to read message");
                break;
            }
        }
    }

    warn!("OVSDB: connection closed");
    shared.connected.store(false, Ordering::SeqCst);
    let pending: Vec<Pending> = shared.pending.lock().drain().map(|(_, p)| p).collect();
    for p in pending {
        let _ = p.tx.send(Err(OvsDbError::Disconnected));
    }
    shared.events.lock().take();
}

async fn handle_message(msg: Value, shared: &Shared, outgoing: &mpsc::UnboundedSender<Value>) {
    trace!("OVSDB: recv {}", msg);
    match msg.get("method").and_then(Value::as_str) {
        Some("echo") => {
            let reply = json!({"id": msg["id"], "result": msg["params"], "error": null});
            let _ = outgoing.send(reply);
        }
        Some("update") => match msg["params"].get(1) {
            Some(updates) => {
                let applied = shared.cache.write().apply_table_updates(updates);
                match applied {
                    Ok(events) => emit(shared, events).await,
                    Err(e) => warn!(error = %e, "OVSDB: dropping malformed update"),
                }
            }
            None => warn!("OVSDB: update notification without table updates"),
        },
        Some(method) => debug!(%method, "OVSDB: ignoring notification"),
        None => handle_reply(&msg, shared).await,
    }
}

async fn handle_reply(msg: &Value, shared: &Shared) {
    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
        warn!("OVSDB: reply without a numeric id: {}", msg);
        return;
    };
    let Some(pending) = shared.pending.lock().remove(&id) else {
        debug!(id, "OVSDB: reply for unknown or abandoned request");
        return;
    };

    match parse_reply(msg) {
        Ok(initial) if pending.initial_monitor => {
            let applied = shared.cache.write().apply_table_updates(&initial);
            match applied {
                // Wake the caller first: it may be the one that drains the
                // event channel.
                Ok(events) => {
                    let _ = pending.tx.send(Ok(initial));
                    emit(shared, events).await;
                }
                Err(e) => {
                    let _ = pending.tx.send(Err(e));
                }
            }
        }
        reply => {
            let _ = pending.tx.send(reply);
        }
    }
}

fn parse_reply(msg: &Value) -> Result<Value> {
    match msg.get("error") {
        None | Some(Value::Null) => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
        Some(Value::Object(err)) => Err(OvsDbError::Rpc {
            error: err
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            details: err
                .get("details")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        Some(Value::String(err)) => Err(OvsDbError::Rpc {
            error: err.clone(),
            details: String::new(),
        }),
        Some(other) => Err(OvsDbError::Rpc {
            error: other.to_string(),
            details: String::new(),
        }),
    }
}

async fn emit(shared: &Shared, events: Vec<RowEvent>) {
    let sender = shared.events.lock().clone();
    let Some(sender) = sender else {
        return;
    };
    for event in events {
        if sender.send(event).await.is_err() {
            debug!("OVSDB: event subscriber went away");
            break;
        }
    }
}
