//! The command dispatcher: a blocking read loop over the framed stream,
//! one reply per recognized command, and a single writer task so replies
//! and orchestrator events leave in causal order.

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::codec;
use crate::protocol::{
    Command, CommandEnvelope, LoadScidParams, Outbound, ReplyEnvelope, SetNodeParams,
    INIT_SCIDS_ID,
};
use crate::state::BridgeState;
use crate::sync;

/// Run the command loop until the peer closes the stream, then release the
/// collaborators. The writer half drains `outbound`; handlers and background
/// tasks push into its sender side.
pub async fn run<R, W>(reader: R, writer: W, state: BridgeState, outbound: mpsc::Receiver<Outbound>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer_task = tokio::spawn(write_loop(writer, outbound));

    let mut reader = reader;
    loop {
        let frame = match codec::read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("peer closed the stream");
                break;
            }
            Err(err) => {
                warn!(error = %err, "stream read failed");
                break;
            }
        };

        let envelope: CommandEnvelope = match serde_json::from_slice(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(error = %err, "dropping malformed frame");
                continue;
            }
        };
        handle_command(&state, envelope).await;
    }

    state.shutdown().await;
    writer_task.abort();
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::Receiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        match codec::encode_frame(&message) {
            Ok(frame) => {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            Err(err) => error!(error = %err, "failed to encode outbound frame"),
        }
    }
}

async fn handle_command(state: &BridgeState, envelope: CommandEnvelope) {
    let id = envelope.id;
    match envelope.command {
        Command::SetNode { params } => handle_set_node(state, id, params).await,
        Command::DisconnectNode => {
            let reply = handle_disconnect(state, id).await;
            state.send(Outbound::Reply(reply)).await;
        }
        Command::LoadScid { params } => {
            let reply = handle_load_scid(state, id, params).await;
            state.send(Outbound::Reply(reply)).await;
        }
        Command::ServerStatus => {
            let reply = handle_server_status(state, id).await;
            state.send(Outbound::Reply(reply)).await;
        }
        Command::ListScids => {
            let scids = state.registry().scids().await;
            let reply = ReplyEnvelope::with_result(id, json!({ "scids": scids }));
            state.send(Outbound::Reply(reply)).await;
        }
        Command::Unknown => {
            state
                .send(Outbound::Reply(ReplyEnvelope::err(id, "unknown command")))
                .await;
        }
    }
}

async fn handle_set_node(state: &BridgeState, id: Value, params: SetNodeParams) {
    let node = match normalize_node(&params.node) {
        Ok(node) => node,
        Err(message) => {
            state
                .send(Outbound::Reply(ReplyEnvelope::err(id, message)))
                .await;
            return;
        }
    };

    if state.node().as_deref() == Some(node.as_str()) {
        state.send(Outbound::Reply(ReplyEnvelope::ok(id))).await;
        return;
    }

    // A node change obsoletes the previous session wholesale: its token is
    // fired before the replacement is installed.
    state.cancel_session();
    if let Some(engine) = state.take_engine() {
        engine.close();
    }
    state.set_engine_running(false);
    state.set_node(Some(node.clone()));
    state.set_disconnected(true);

    info!(%node, "starting sync session");
    let session = sync::start(state.clone(), node);
    state.install_session(session);

    state.send(Outbound::Reply(ReplyEnvelope::ok(id))).await;

    // Tell the frontend which SCIDs are already loaded.
    let scids = state.registry().scids().await;
    state
        .send(Outbound::Reply(ReplyEnvelope::with_result(
            Value::from(INIT_SCIDS_ID),
            json!({ "scids": scids }),
        )))
        .await;
}

async fn handle_disconnect(state: &BridgeState, id: Value) -> ReplyEnvelope {
    state.set_disconnected(true);
    state.cancel_session();
    if let Some(engine) = state.take_engine() {
        engine.close();
    }
    state.set_engine_running(false);
    state.registry().reset().await;
    state.set_node(None);
    info!("node disconnected");
    ReplyEnvelope::ok(id)
}

async fn handle_load_scid(state: &BridgeState, id: Value, params: LoadScidParams) -> ReplyEnvelope {
    if state.node().is_none() {
        return ReplyEnvelope::err(id, "node not set");
    }

    // Resolution goes through the registry's own HTTP surface, the same
    // path the page itself would use.
    let add_url = format!("{}/add/{}", state.proxy_base(), params.scid);
    let response = match state.http().get(&add_url).send().await {
        Ok(response) => response,
        Err(err) => return ReplyEnvelope::err(id, err.to_string()),
    };
    let status = response.status();
    let body: Value = match response.json().await {
        Ok(body) => body,
        Err(_) => return ReplyEnvelope::err(id, format!("scid resolution failed: {status}")),
    };

    if !status.is_success() || body.get("ok").and_then(Value::as_bool) != Some(true) {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("scid resolution failed");
        return ReplyEnvelope::err(id, message);
    }

    let url = body.pointer("/result/url").cloned().unwrap_or(Value::Null);
    ReplyEnvelope::with_result(id, json!({ "url": url }))
}

async fn handle_server_status(state: &BridgeState, id: Value) -> ReplyEnvelope {
    let node = state.node();

    let mut tela_ok = probe(state, &format!("{}/healthz", state.proxy_base())).await;
    if state.is_disconnected() {
        tela_ok = false;
    }

    let mut gnomon_ok = probe(state, &format!("{}/api/getinfo", state.index_api_base())).await;
    if !state.engine_running() || state.is_disconnected() {
        gnomon_ok = false;
    }

    let indexed = state.store().last_indexed_height().unwrap_or(0);
    let chain = match &node {
        Some(node) => state.chain().chain_height(node).await.unwrap_or(0),
        None => 0,
    };

    ReplyEnvelope::with_result(
        id,
        json!({
            "tela": tela_ok,
            "gnomon": gnomon_ok,
            "connected": tela_ok && gnomon_ok,
            "node": node.unwrap_or_default(),
            "heights": { "indexed": indexed, "chain": chain },
        }),
    )
}

/// Any HTTP answer counts as alive; only a transport error counts as down.
async fn probe(state: &BridgeState, url: &str) -> bool {
    state.http().get(url).send().await.is_ok()
}

/// Trim and force an absolute URL, defaulting the scheme to http.
fn normalize_node(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("node not set".to_string());
    }
    let node = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    Url::parse(&node).map_err(|err| format!("invalid node address: {err}"))?;
    Ok(node)
}
