use std::convert::Infallible;
use std::sync::Arc;

use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::api::engine::{open_upstream, Established, UpstreamCall};
use crate::error::{into_axum_response, GatewayError};
use crate::observability::log_request_complete;
use crate::observability::token_counter::{estimate_tokens_for_len, merge_usage};
use crate::state::AppState;
use crate::stream::{upstream_event_stream, StreamTranslator, SyntheticReasoning};
use crate::transport::Endpoint;

use super::{sse_ok_response, ChatContext};

/// Frames buffered between the pump task and the client connection.
const BODY_CHANNEL_CAPACITY: usize = 16;

type FrameSender = mpsc::Sender<Bytes>;

/// Response body fed by a channel. Dropping the body (client gone) makes
/// every later send fail, which is the pump's signal to stop.
fn channel_body() -> (FrameSender, axum::body::Body) {
    let (tx, rx) = mpsc::channel::<Bytes>(BODY_CHANNEL_CAPACITY);
    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|frame| (Ok::<Bytes, Infallible>(frame), rx))
    });
    (tx, axum::body::Body::from_stream(frames))
}

/// Send what `out` holds. Returns `false` once the client is gone, even
/// when there is nothing to send.
async fn flush(tx: &FrameSender, out: &mut String) -> bool {
    if out.is_empty() {
        return !tx.is_closed();
    }
    let frame = Bytes::from(std::mem::take(out));
    tx.send(frame).await.is_ok()
}

/// Serve a streaming chat completion.
///
/// Without synthetic reasoning the upstream is opened before any header is
/// sent, so retry-exhausted failures still reach the client as a status
/// code. With synthetic reasoning the headers go out immediately and the
/// upstream is opened while the synthetic chunks play; failures after that
/// point are delivered inline.
pub(crate) async fn handle_streaming(state: Arc<AppState>, ctx: ChatContext) -> Response {
    let thinking = &state.config.thinking;
    let translator = StreamTranslator::new(
        ctx.request_id.clone(),
        ctx.created,
        ctx.model.clone(),
        thinking.delivery,
    );

    if thinking.synthetic_active() {
        let synthetic = SyntheticReasoning::new(thinking, &ctx.user_text);
        let (tx, body) = channel_body();
        tokio::spawn(run_with_synthetic(state, ctx, translator, synthetic, tx));
        return sse_ok_response(body);
    }

    let established = match open_upstream(
        &state,
        UpstreamCall {
            request_id: &ctx.request_id,
            model: &ctx.model,
            body: &ctx.upstream_body,
            endpoint: Endpoint::Stream,
            allow_fallback: true,
        },
    )
    .await
    {
        Ok(established) => established,
        Err(err) => return into_axum_response(&err),
    };

    let (tx, body) = channel_body();
    tokio::spawn(async move {
        let mut translator = translator;
        pump_upstream(&state, &ctx, &mut translator, established, &tx).await;
    });
    sse_ok_response(body)
}

async fn run_with_synthetic(
    state: Arc<AppState>,
    ctx: ChatContext,
    mut translator: StreamTranslator,
    synthetic: SyntheticReasoning,
    tx: FrameSender,
) {
    let upstream = open_upstream(
        &state,
        UpstreamCall {
            request_id: &ctx.request_id,
            model: &ctx.model,
            body: &ctx.upstream_body,
            endpoint: Endpoint::Stream,
            allow_fallback: true,
        },
    );
    let (connected, opened) = tokio::join!(
        deliver_synthetic(synthetic, &mut translator, &tx),
        upstream
    );
    if !connected {
        tracing::debug!(request_id = %ctx.request_id, "client disconnected during synthetic reasoning");
        return;
    }

    match opened {
        Ok(established) => pump_upstream(&state, &ctx, &mut translator, established, &tx).await,
        Err(err) => {
            let mut out = String::with_capacity(256);
            translator.push_inline_error(&err.to_string(), &mut out);
            translator.push_finish(&mut out);
            if flush(&tx, &mut out).await {
                complete(&ctx, &translator);
            }
        }
    }
}

async fn deliver_synthetic(
    synthetic: SyntheticReasoning,
    translator: &mut StreamTranslator,
    tx: &FrameSender,
) -> bool {
    let chunks = synthetic.into_stream();
    let mut chunks = std::pin::pin!(chunks);
    let mut out = String::with_capacity(256);
    while let Some(chunk) = chunks.next().await {
        translator.push_synthetic(chunk, &mut out);
        if !flush(tx, &mut out).await {
            return false;
        }
    }
    true
}

/// Translate upstream events into client frames until the upstream ends,
/// fails, or the client goes away.
async fn pump_upstream(
    state: &AppState,
    ctx: &ChatContext,
    translator: &mut StreamTranslator,
    established: Established,
    tx: &FrameSender,
) {
    let Established {
        reply,
        model,
        notice,
    } = established;
    translator.set_model(&model);

    let mut out = String::with_capacity(1024);
    if let Some(notice) = notice {
        translator.push_text(notice, &mut out);
    }

    let events = upstream_event_stream(reply.body, state.upstream_idle_timeout());
    let mut events = std::pin::pin!(events);
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                if let Some(message) = translator.push_event(&event, &mut out) {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        model = &*model,
                        "upstream reported an error mid-stream: {message}"
                    );
                    translator.push_inline_error(&message, &mut out);
                    break;
                }
            }
            Err(err) => {
                log_stream_failure(ctx, &model, &err);
                translator.push_inline_error(&err.to_string(), &mut out);
                break;
            }
        }
        if !flush(tx, &mut out).await {
            tracing::debug!(request_id = %ctx.request_id, "client disconnected, dropping upstream");
            return;
        }
    }

    translator.push_finish(&mut out);
    if flush(tx, &mut out).await {
        complete(ctx, translator);
    }
}

fn log_stream_failure(ctx: &ChatContext, model: &str, err: &GatewayError) {
    tracing::warn!(
        request_id = %ctx.request_id,
        model = model,
        "upstream stream failed after headers were sent: {err}"
    );
}

fn complete(ctx: &ChatContext, translator: &StreamTranslator) {
    tracing::debug!(
        request_id = %ctx.request_id,
        chunks = translator.content_chunks(),
        "stream finished"
    );
    let usage = merge_usage(
        translator.usage(),
        ctx.estimated_prompt_tokens,
        estimate_tokens_for_len(translator.emitted_bytes()),
    );
    log_request_complete(&ctx.request_id, translator.model(), &usage, ctx.started);
}
