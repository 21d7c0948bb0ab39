use std::time::Duration;

use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy_primitives::Address;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contract::RequestCreated;
use crate::errors::GuardError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const ERROR_BUFFER: usize = 16;

/// Receiving ends handed to the watcher.
pub struct EventStreams {
    pub events: mpsc::Receiver<RequestCreated>,
    pub errors: mpsc::Receiver<GuardError>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    pub ws_url: String,
    pub contract: Address,
    pub event_buffer: usize,
    pub resubscribe_delay: Duration,
}

/// Spawns the subscription supervisor. It runs until `cancel` fires.
pub fn spawn(settings: SubscriptionSettings, cancel: CancellationToken) -> EventStreams {
    let (event_tx, events) = mpsc::channel(settings.event_buffer.max(1));
    let (error_tx, errors) = mpsc::channel(ERROR_BUFFER);
    let ws_url = settings.ws_url.clone();
    let contract = settings.contract;
    let dial = move || subscribe(ws_url.clone(), contract);
    tokio::spawn(supervise(settings, dial, event_tx, error_tx, cancel));
    EventStreams { events, errors }
}

/// Opens a WebSocket provider. Used on its own at startup to fail fast on a
/// bad `WS_URL`.
pub async fn dial(ws_url: &str) -> Result<DynProvider, GuardError> {
    let provider = ProviderBuilder::new()
        .disable_recommended_fillers()
        .connect_ws(WsConnect::new(ws_url))
        .await
        .map_err(|e| GuardError::Subscription(format!("dial {ws_url}: {e}")))?;
    Ok(provider.erased())
}

/// Dial, forward, back off, repeat. `dial` opens one session and yields its
/// log stream; the back-off resets whenever it succeeds.
async fn supervise<D, F, S>(
    settings: SubscriptionSettings,
    mut dial: D,
    events: mpsc::Sender<RequestCreated>,
    errors: mpsc::Sender<GuardError>,
    cancel: CancellationToken,
) where
    D: FnMut() -> F + Send,
    F: Future<Output = Result<S, GuardError>> + Send,
    S: Stream<Item = Log> + Send,
{
    info!(contract = %settings.contract, event = RequestCreated::SIGNATURE, "subscription supervisor started");
    let mut backoff = settings.resubscribe_delay;

    loop {
        let dialed = tokio::select! {
            _ = cancel.cancelled() => break,
            dialed = dial() => dialed,
        };

        match dialed {
            Ok(stream) => {
                info!(ws_url = %settings.ws_url, "subscribed to RequestCreated logs");
                backoff = settings.resubscribe_delay;
                let ended = tokio::select! {
                    _ = cancel.cancelled() => break,
                    ended = forward_logs(stream, &events, &errors) => ended,
                };
                report(&errors, ended);
            }
            Err(err) => report(&errors, err),
        }

        warn!(?backoff, "resubscribing after delay");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(backoff) => {}
        }
        backoff = next_backoff(backoff);
    }

    info!("subscription supervisor stopped");
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

async fn subscribe(ws_url: String, contract: Address) -> Result<BoxStream<'static, Log>, GuardError> {
    let provider = dial(&ws_url).await?;

    let filter = Filter::new()
        .address(contract)
        .event_signature(RequestCreated::SIGNATURE_HASH);

    let subscription = provider
        .subscribe_logs(&filter)
        .await
        .map_err(|e| GuardError::Subscription(format!("eth_subscribe logs: {e}")))?;

    // The pubsub backend shuts down once its last provider handle is dropped.
    Ok(subscription
        .into_stream()
        .map(move |log| {
            let _session = &provider;
            log
        })
        .boxed())
}

/// Pumps logs into the event channel until the stream ends, returning the
/// reason the session is over.
async fn forward_logs<S>(stream: S, events: &mpsc::Sender<RequestCreated>, errors: &mpsc::Sender<GuardError>) -> GuardError
where
    S: Stream<Item = Log>,
{
    let mut stream = std::pin::pin!(stream);
    while let Some(log) = stream.next().await {
        if log.removed {
            debug!(tx_hash = ?log.transaction_hash, "dropping removed log");
            continue;
        }
        match RequestCreated::decode_log(&log.inner) {
            Ok(decoded) => deliver(events, decoded.data),
            Err(e) => report(errors, GuardError::Decode(format!("RequestCreated log: {e}"))),
        }
    }
    GuardError::Subscription("log stream closed".into())
}

fn deliver(events: &mpsc::Sender<RequestCreated>, event: RequestCreated) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!(id = %event.id, "event channel full, dropping RequestCreated");
        }
        Err(TrySendError::Closed(_)) => {
            debug!("event receiver gone");
        }
    }
}

fn report(errors: &mpsc::Sender<GuardError>, err: GuardError) {
    debug!(error = %err, "reporting subscription error");
    if let Err(TrySendError::Full(err)) = errors.try_send(err) {
        debug!(error = %err, "error channel full, dropping error");
    }
}
