//! JSON-line request loop.
//!
//! Each request line is handled on its own task so that a stop or status
//! query is never stuck behind a long-running `send`. Replies are written
//! by a single writer task in completion order and carry the request `id`.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::supervisor::{SessionError, StartRequest};

use super::{AssistantService, Call, ErrorBody, Reply, Request, Workflow};

const REPLY_BUFFER: usize = 64;

/// Errors that end the request loop.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Request channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serve requests from `reader` until end of input, then stop the session.
///
/// # Errors
///
/// Returns `ServeError` if the input cannot be read or a reply cannot be
/// written.
pub async fn serve<R, W>(service: AssistantService, reader: R, writer: W) -> Result<(), ServeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Reply>(REPLY_BUFFER);
    let writer_task = tokio::spawn(write_replies(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    let mut in_flight = JoinSet::new();

    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(ServeError::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                tracing::debug!(id = %request.id, op = request.call.op(), "Request received");
                let service = service.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let reply = handle(&service, request).await;
                    if tx.send(reply).await.is_err() {
                        tracing::debug!("Reply writer closed, dropping reply");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request");
                let id = serde_json::from_str::<Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(Value::Null);
                let _ = tx.send(Reply::invalid_request(id, e.to_string())).await;
            }
        }

        // Reap finished handlers so the set does not grow unbounded.
        while in_flight.try_join_next().is_some() {}
    };

    tracing::info!("Request channel closed, stopping session");
    service.stop().await;
    while in_flight.join_next().await.is_some() {}

    drop(tx);
    let write_result = match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(ServeError::Io(std::io::Error::other(e))),
    };

    read_result.and(write_result)
}

async fn write_replies<W>(mut writer: W, mut rx: mpsc::Receiver<Reply>) -> Result<(), ServeError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = rx.recv().await {
        let mut json = serde_json::to_string(&reply)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn to_reply<T: Serialize>(id: Value, result: Result<T, SessionError>) -> Reply {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Reply::success(id, value),
            Err(e) => Reply::invalid_request(id, format!("failed to encode result: {e}")),
        },
        Err(e) => {
            tracing::debug!(kind = e.kind(), error = %e, "Operation failed");
            Reply::failure(id, ErrorBody::from(&e))
        }
    }
}

/// Execute one request against the service.
pub async fn handle(service: &AssistantService, request: Request) -> Reply {
    let id = request.id;
    match request.call {
        Call::Start {
            files,
            message,
            config,
        } => to_reply(
            id,
            service
                .start(StartRequest {
                    files,
                    message,
                    config,
                })
                .await,
        ),
        Call::QuickStart {
            workflow,
            files,
            config,
        } => match workflow.parse::<Workflow>() {
            Ok(workflow) => to_reply(id, service.quick_start(workflow, files, config).await),
            Err(e) => to_reply::<()>(id, Err(e)),
        },
        Call::Send { message } => to_reply(id, service.send(&message).await),
        Call::AddFiles { paths } => to_reply(id, service.add_files(&paths).await),
        Call::DropFiles { paths } => to_reply(id, service.drop_files(&paths).await),
        Call::RunCommand { command } => to_reply(id, service.run_command(&command).await),
        Call::ListFiles => to_reply(id, Ok(service.list_files().await)),
        Call::Configure { patch } => to_reply(id, Ok(service.configure(&patch).await)),
        Call::GetStatus => to_reply(id, Ok(service.status().await)),
        Call::GetDebugInfo => to_reply(id, Ok(service.debug_info().await)),
        Call::TestConnection => to_reply(id, Ok(service.test_connection().await)),
        Call::SetLogLevel { level } => to_reply(
            id,
            service
                .set_log_level(&level)
                .await
                .map(|level| serde_json::json!({ "level": level })),
        ),
        Call::Stop => to_reply(id, Ok(service.stop().await)),
        Call::EmergencyStop => to_reply(id, Ok(service.emergency_stop().await)),
    }
}
