// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Unix-socket hub serving the Quill application API.
//!
//! Each connection handshakes once; the handshake's `agent_id` becomes the
//! actor of every call made on that connection. Calls are dispatched through
//! an in-process caller and answered in order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use quill_api::{app_router, seed_demo, MemoryStore, Store};
use quill_app_core::config::{ConfigService, ConfigStore};
use quill_app_core::prefs::HostPrefs;
use quill_config_fs::FsConfigStore;
use quill_registry_api::{CallError, Context, Registry};
use quill_session_proto::wire::{decode_message, encode_message, FrameBuffer};
use quill_session_proto::{
    default_socket_path, AckStatus, CallPayload, ErrorPayload, HandshakeAckPayload, HandshakePayload,
    Message, ReplyPayload, PROTOCOL_VERSION,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const E_BAD_PACKET: u32 = 400;
const E_NO_SESSION: u32 = 401;
const E_VERSION: u32 = 426;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quill session hub")]
struct Args {
    /// Unix socket to listen on (defaults to the saved preference, then the runtime dir)
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Seed the in-memory store with demo payments, products and settings
    #[arg(long)]
    seed_demo: bool,
    /// Write the effective preferences back to the config store
    #[arg(long)]
    save_prefs: bool,
}

struct Session {
    id: String,
    actor: Option<String>,
}

struct ConnState {
    tx: mpsc::Sender<Vec<u8>>,
    session: Option<Session>,
}

#[derive(Default)]
struct HubState {
    next_conn_id: u64,
    next_ts: u64,
    conns: HashMap<u64, ConnState>,
}

impl HubState {
    fn alloc_ts(&mut self) -> u64 {
        let t = self.next_ts;
        self.next_ts += 1;
        t
    }
}

struct Hub {
    registry: Arc<Registry>,
    state: Mutex<HubState>,
}

impl Hub {
    fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            state: Mutex::new(HubState::default()),
        }
    }

    async fn connect(&self, tx: mpsc::Sender<Vec<u8>>) -> u64 {
        let mut h = self.state.lock().await;
        let id = h.next_conn_id;
        h.next_conn_id += 1;
        h.conns.insert(id, ConnState { tx, session: None });
        id
    }

    async fn disconnect(&self, conn_id: u64) {
        let mut h = self.state.lock().await;
        if let Some(ConnState {
            session: Some(session),
            ..
        }) = h.conns.remove(&conn_id)
        {
            info!(conn_id, session_id = %session.id, "session closed");
        }
    }

    // Stamp and queue `msg` for one connection; a vanished connection is not an error.
    async fn send(&self, conn_id: u64, msg: &Message) -> Result<()> {
        let (tx, ts) = {
            let mut h = self.state.lock().await;
            let ts = h.alloc_ts();
            match h.conns.get(&conn_id) {
                Some(conn) => (conn.tx.clone(), ts),
                None => return Ok(()),
            }
        };
        let pkt = encode_message(msg, ts)?;
        let _ = tx.send(pkt).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Config (best-effort)
    let config = FsConfigStore::new()
        .map(ConfigService::new)
        .map_err(|err| warn!(%err, "config store unavailable; using defaults"))
        .ok();
    let prefs = effective_prefs(config.as_ref(), &args);
    if args.save_prefs {
        if let Some(cfg) = &config {
            cfg.save_doc(&prefs)?;
            info!(base = %cfg.store().base().display(), "host prefs saved");
        }
    }

    let store = Arc::new(MemoryStore::new());
    if prefs.seed_demo {
        seed_demo(&*store)?;
        info!("demo data seeded");
    }
    let store: Arc<dyn Store> = store;
    let registry = Arc::new(app_router(&store)?);
    for def in registry.procedures() {
        debug!(group = def.group, operation = def.name, kind = ?def.kind, "procedure registered");
    }
    info!(
        groups = registry.group_names().count(),
        procedures = registry.len(),
        "application router ready"
    );

    let socket_path = prefs.socket_path.unwrap_or_else(default_socket_path);
    // Remove stale socket if present
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    info!(path = %socket_path.display(), "session hub listening");

    serve(listener, Arc::new(Hub::new(registry))).await
}

// Saved prefs, then command-line overrides.
fn effective_prefs<S: ConfigStore>(config: Option<&ConfigService<S>>, args: &Args) -> HostPrefs {
    let mut prefs: HostPrefs = config
        .and_then(|c| {
            c.load_doc()
                .map_err(|err| warn!(%err, "ignoring unreadable host prefs"))
                .ok()
        })
        .unwrap_or_default();
    if let Some(socket) = &args.socket {
        prefs.socket_path = Some(socket.clone());
    }
    prefs.seed_demo |= args.seed_demo;
    prefs
}

async fn serve(listener: UnixListener, hub: Arc<Hub>) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            if let Err(err) = handle_client(stream, &hub).await {
                warn!(?err, "client handler error");
            }
        });
    }
}

async fn handle_client(stream: UnixStream, hub: &Hub) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
    let conn_id = hub.connect(tx).await;
    debug!(conn_id, "connection accepted");

    // writer task
    tokio::spawn(async move {
        while let Some(buf) = rx.recv().await {
            if writer.write_all(&buf).await.is_err() {
                break;
            }
        }
    });

    let outcome = read_loop(&mut reader, conn_id, hub).await;
    hub.disconnect(conn_id).await;
    outcome
}

async fn read_loop<R>(reader: &mut R, conn_id: u64, hub: &Hub) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut read_buf = vec![0u8; 16 * 1024];
    let mut frames = FrameBuffer::new();
    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            return Ok(());
        }
        frames.extend(&read_buf[..n]);

        // process as many frames as available
        loop {
            let packet = match frames.next_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(err) => {
                    warn!(conn_id, %err, "unreadable frame; closing connection");
                    let reply = ErrorPayload::new(E_BAD_PACKET, "E_BAD_PACKET", err.to_string());
                    hub.send(conn_id, &Message::Error(reply)).await?;
                    return Ok(());
                }
            };
            match decode_message(&packet) {
                Ok((msg, _ts, _used)) => handle_message(msg, conn_id, hub).await?,
                Err(err) => {
                    warn!(conn_id, %err, "failed to decode packet");
                    let reply = ErrorPayload::new(E_BAD_PACKET, "E_BAD_PACKET", err.to_string());
                    hub.send(conn_id, &Message::Error(reply)).await?;
                }
            }
        }
    }
}

// Handle a single inbound message from a connection.
async fn handle_message(msg: Message, conn_id: u64, hub: &Hub) -> Result<()> {
    match msg {
        Message::Handshake(handshake) => handshake_ack(handshake, conn_id, hub).await,
        Message::Call(call) => dispatch(call, conn_id, hub).await,
        Message::HandshakeAck(_) | Message::Reply(_) | Message::Error(_) => {
            // should not be initiated by clients; ignore
            debug!(conn_id, op = msg.op_name(), "ignoring host-only message");
            Ok(())
        }
    }
}

async fn handshake_ack(handshake: HandshakePayload, conn_id: u64, hub: &Hub) -> Result<()> {
    if handshake.client_version != PROTOCOL_VERSION {
        warn!(conn_id, client_version = handshake.client_version, "unsupported client version");
        let ack = Message::HandshakeAck(HandshakeAckPayload {
            status: AckStatus::Error,
            server_version: PROTOCOL_VERSION,
            capabilities: Vec::new(),
            session_id: String::new(),
            error: Some(ErrorPayload::new(
                E_VERSION,
                "E_VERSION",
                format!("client version {} is not supported", handshake.client_version),
            )),
        });
        return hub.send(conn_id, &ack).await;
    }
    let session_id = format!("session-{conn_id}");
    {
        let mut h = hub.state.lock().await;
        if let Some(conn) = h.conns.get_mut(&conn_id) {
            conn.session = Some(Session {
                id: session_id.clone(),
                actor: handshake.agent_id.clone(),
            });
        }
    }
    info!(conn_id, %session_id, actor = ?handshake.agent_id, "session opened");
    let ack = Message::HandshakeAck(HandshakeAckPayload {
        status: AckStatus::Ok,
        server_version: PROTOCOL_VERSION,
        capabilities: handshake.capabilities,
        session_id,
        error: None,
    });
    hub.send(conn_id, &ack).await
}

async fn dispatch(call: CallPayload, conn_id: u64, hub: &Hub) -> Result<()> {
    let context = {
        let h = hub.state.lock().await;
        h.conns
            .get(&conn_id)
            .and_then(|conn| conn.session.as_ref())
            .map(|session| {
                let context = Context::new(session.id.clone());
                match &session.actor {
                    Some(actor) => context.with_actor(actor.clone()),
                    None => context,
                }
            })
    };
    let Some(context) = context else {
        warn!(conn_id, group = %call.group, operation = %call.operation, "call before handshake");
        let reply = ErrorPayload::new(E_NO_SESSION, "E_NO_SESSION", "handshake required before calls");
        return hub.send(conn_id, &Message::Error(reply)).await;
    };

    // The lock is not held while the handler runs.
    let caller = hub.registry.create_caller(context);
    let result = caller.call(&call.group, &call.operation, call.input).await;
    match &result {
        Ok(_) => debug!(conn_id, group = %call.group, operation = %call.operation, "call answered"),
        Err(err @ CallError::NotFound { .. }) => {
            error!(conn_id, %err, "call to unregistered procedure");
        }
        Err(err) => debug!(conn_id, group = %call.group, operation = %call.operation, kind = ?err.kind(), "call rejected"),
    }
    let reply = Message::Reply(ReplyPayload {
        id: call.id,
        result: result.into(),
    });
    hub.send(conn_id, &reply).await
}
