//! Line-oriented request loop: NDJSON [`IssueTokenRequest`]s in, one JSON
//! response line out per request.
//!
//! Up to `max_in_flight` requests run concurrently; once that many are
//! outstanding no further lines are read. Responses are written in completion
//! order and carry the request `id` for correlation.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use common::protocol::{ErrorResponse, IssueTokenRequest, IssueTokenResponse};
use serde::Serialize;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::issuer::CredentialIssuer;

/// Responses buffered between request tasks and the writer.
const RESPONSE_BUFFER: usize = 64;

/// Read requests from `reader` until EOF or cancellation and write responses to `writer`.
///
/// On cancellation no further lines are read; in-flight requests observe the
/// same token and finish with a `cancelled` error line. A `max_in_flight` of
/// zero is treated as one.
///
/// # Errors
///
/// Returns an error if reading input or writing output fails.
pub async fn run<R, W>(
    issuer: Arc<CredentialIssuer>,
    reader: R,
    writer: W,
    timeout: Duration,
    max_in_flight: usize,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<String>(RESPONSE_BUFFER);
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let limiter = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut lines = reader.lines();
    let mut tasks = JoinSet::new();
    let mut received = 0usize;

    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("shutdown requested; no further requests accepted");
                break;
            }
            permit = Arc::clone(&limiter).acquire_owned() => {
                permit.context("request limiter closed")?
            }
        };
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("shutdown requested; no further requests accepted");
                break;
            }
            line = lines.next_line() => line.context("failed to read request line")?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        received += 1;

        let issuer = Arc::clone(&issuer);
        let tx = tx.clone();
        let cancel = cancel.child_token();
        tasks.spawn(async move {
            let response = handle_line(&issuer, &line, timeout, &cancel).await;
            drop(permit);
            if tx.send(response).await.is_err() {
                warn!("response writer closed; dropping response");
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "request task failed");
        }
    }
    drop(tx);

    writer_task
        .await
        .context("response writer task failed")?
        .context("failed to write response")?;
    info!(received, "worker stopped");
    Ok(())
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Turn one request line into one response line.
async fn handle_line(
    issuer: &CredentialIssuer,
    line: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> String {
    let request: IssueTokenRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "malformed request line");
            return encode_line(&ErrorResponse::new(
                None,
                "invalid_request",
                format!("malformed request: {e}"),
            ));
        }
    };
    let IssueTokenRequest { id, prefix, body } = request;

    let issued = tokio::time::timeout(timeout, issuer.issue_token(&prefix, &body, cancel)).await;
    match issued {
        Ok(Ok(token)) => match String::from_utf8(token) {
            Ok(token) => encode_line(&IssueTokenResponse { id, token }),
            Err(_) => encode_line(&ErrorResponse::new(
                id,
                "encoding_error",
                "token is not valid UTF-8",
            )),
        },
        Ok(Err(e)) => {
            warn!(prefix = %prefix, code = e.code(), error = %e, "token issuance failed");
            encode_line(&ErrorResponse::new(id, e.code(), e.to_string()))
        }
        Err(_) => {
            warn!(prefix = %prefix, ?timeout, "token issuance timed out");
            encode_line(&ErrorResponse::new(
                id,
                "timeout",
                format!("no token issued within {timeout:?}"),
            ))
        }
    }
}

fn encode_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        error!(error = %e, "response serialisation failed");
        r#"{"code":"encoding_error","message":"response serialisation failed"}"#.to_owned()
    })
}
