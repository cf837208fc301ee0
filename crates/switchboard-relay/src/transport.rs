//! WebSocket transport adapter
//!
//! Bridges one live WebSocket connection to the hub. Each connection runs two
//! units:
//!
//! - a reader that decodes text frames into envelopes and forwards them to the
//!   hub, enforcing a pong-driven read deadline;
//! - a writer that drains the session mailbox to the socket and sends pings.
//!
//! Whichever unit ends first ends the session: the adapter then sends exactly
//! one leave event and waits for the writer to flush whatever the hub had
//! already queued. The writer stops when the hub closes the mailbox.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use switchboard_core::{Config, PeerId, TransportConfig};

use crate::envelope::Envelope;
use crate::error::RelayError;
use crate::hub::HubHandle;
use crate::session::{mailbox, MailboxReceiver};

/// Error text sent back for frames that are not valid envelopes
pub const INVALID_JSON_MESSAGE: &str = "Invalid JSON format";

/// Replies generated by the adapter itself (never routed through the hub)
const LOCAL_REPLY_CAPACITY: usize = 4;

/// WebSocket settings derived from the transport configuration
pub fn websocket_config(config: &TransportConfig) -> WebSocketConfig {
    let mut ws = WebSocketConfig::default();
    ws.max_message_size = Some(config.max_message_size);
    ws.max_frame_size = Some(config.max_message_size);
    ws
}

/// Run one session over an already upgraded WebSocket
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    hub: HubHandle,
    config: &Config,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mailbox_tx, mailbox_rx) = mailbox(config.hub.mailbox_capacity);
    let id = hub.join(mailbox_tx).await?;
    info!("Connection attached as session {}", id);

    let (sink, stream) = ws.split();
    let (local_tx, local_rx) = mpsc::channel(LOCAL_REPLY_CAPACITY);

    let mut writer = tokio::spawn(write_pump(
        sink,
        mailbox_rx,
        local_rx,
        config.transport.clone(),
        id.clone(),
    ));

    let mut writer_done = false;
    tokio::select! {
        result = read_pump(stream, &hub, &id, &local_tx, &config.transport) => {
            if let Err(e) = result {
                debug!("Reader of {} failed: {}", id, e);
            }
        }
        result = &mut writer => {
            writer_done = true;
            log_writer_exit(&id, result);
        }
    }

    if let Err(e) = hub.leave(id.clone()).await {
        warn!("Could not report leave of {}: {}", id, e);
    }
    drop(local_tx);

    if !writer_done {
        log_writer_exit(&id, writer.await);
    }

    info!("Connection of session {} closed", id);
    Ok(())
}

fn log_writer_exit(id: &PeerId, result: Result<Result<(), RelayError>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => debug!("Writer of {} finished", id),
        Ok(Err(e)) => debug!("Writer of {} failed: {}", id, e),
        Err(e) => warn!("Writer task of {} panicked or was cancelled: {}", id, e),
    }
}

/// Read frames until the connection ends or the pong deadline passes
async fn read_pump<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    hub: &HubHandle,
    id: &PeerId,
    local: &mpsc::Sender<Envelope>,
    config: &TransportConfig,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline = Instant::now() + config.pong_wait();

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                debug!("Session {} missed its pong deadline", id);
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match Envelope::from_json(&text) {
                Ok(envelope) => {
                    debug!("Received {} from {}", envelope.kind, id);
                    hub.forward(id.clone(), envelope).await?;
                }
                Err(e) => {
                    debug!("Undecodable envelope from {}: {}", id, e);
                    if local.try_send(Envelope::error(INVALID_JSON_MESSAGE)).is_err() {
                        debug!("Dropped JSON error reply for {}", id);
                    }
                }
            },
            Message::Pong(_) => deadline = Instant::now() + config.pong_wait(),
            Message::Close(_) => return Ok(()),
            // Pings are answered by tungstenite itself.
            Message::Ping(_) => {}
            _ => debug!("Ignoring non-text frame from {}", id),
        }
    }
}

/// Drain the mailbox and local replies to the socket, pinging periodically
async fn write_pump<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut mailbox: MailboxReceiver,
    mut local: mpsc::Receiver<Envelope>,
    config: TransportConfig,
    id: PeerId,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let write_wait = config.write_wait();
    let mut ping = interval_at(Instant::now() + config.ping_period(), config.ping_period());

    loop {
        tokio::select! {
            next = mailbox.recv() => match next {
                Some(envelope) => send_envelope(&mut sink, &envelope, write_wait).await?,
                None => {
                    debug!("Mailbox of {} closed by hub", id);
                    let _ = timeout(write_wait, sink.send(Message::Close(None))).await;
                    return Ok(());
                }
            },
            Some(envelope) = local.recv() => send_envelope(&mut sink, &envelope, write_wait).await?,
            _ = ping.tick() => send_frame(&mut sink, Message::Ping(Vec::new()), write_wait).await?,
        }
    }
}

async fn send_envelope<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    envelope: &Envelope,
    write_wait: Duration,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match envelope.to_json() {
        Ok(json) => send_frame(sink, Message::Text(json), write_wait).await,
        Err(e) => {
            // Skip the envelope, keep the connection.
            warn!("Failed to encode {} envelope: {}", envelope.kind, e);
            Ok(())
        }
    }
}

async fn send_frame<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    frame: Message,
    write_wait: Duration,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(write_wait, sink.send(frame))
        .await
        .map_err(|_| RelayError::WriteTimeout)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_limits_follow_config() {
        let transport = TransportConfig {
            max_message_size: 1024,
            ..TransportConfig::default()
        };
        let ws = websocket_config(&transport);
        assert_eq!(ws.max_message_size, Some(1024));
        assert_eq!(ws.max_frame_size, Some(1024));
    }
}
