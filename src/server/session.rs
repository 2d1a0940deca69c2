// Subscriber session
//
// One read pump and one write pump per WebSocket subscriber. The write
// pump drains the hub queue and keeps the peer alive with pings; the read
// pump enforces liveness and discards inbound frames.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{PING_PERIOD, PONG_WAIT, WRITE_WAIT};
use crate::hub::{FieldFilter, Hub, Sampler};

/// Run a subscriber session until either pump stops or shutdown fires
pub async fn handle_socket(
    socket: WebSocket,
    hub: Arc<Hub>,
    filter: Option<FieldFilter>,
    sampler: Option<Sampler>,
    shutdown: CancellationToken,
) {
    let (id, receiver) = hub.register(filter, sampler).await;
    debug!(client = id, "subscriber connected");

    let (sink, stream) = socket.split();

    let mut write_task = tokio::spawn(write_pump(sink, receiver, Arc::clone(&hub), id));
    let mut read_task = tokio::spawn(read_pump(stream, Arc::clone(&hub), id));

    // Either pump ending tears the whole session down. Shutdown drops the
    // socket so graceful shutdown is not held up by open subscriptions.
    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
        _ = shutdown.cancelled() => {
            write_task.abort();
            read_task.abort();
        }
    }

    hub.remove_client(id).await;
    debug!(client = id, "subscriber disconnected");
}

/// Drain the send queue onto the socket; ping on an interval.
///
/// A closed queue means the hub evicted this subscriber (or the session is
/// shutting down): send a Close frame and stop. Any write failure or
/// deadline overrun stops the pump.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut receiver: mpsc::Receiver<Vec<u8>>,
    hub: Arc<Hub>,
    id: u64,
) {
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.tick().await;

    loop {
        tokio::select! {
            msg = receiver.recv() => {
                match msg {
                    Some(msg) => {
                        if !send_frame(&mut sink, msg).await {
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                // A quiet stream still flushes a due sample.
                if let Some(sample) = hub.take_due_sample(id).await {
                    if !send_frame(&mut sink, sample).await {
                        break;
                    }
                }

                let ping_sent = timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new()))).await;
                if !matches!(ping_sent, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }
}

/// Send one text frame under the write deadline; false means the pump
/// should stop
async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, msg: Vec<u8>) -> bool {
    let Ok(text) = String::from_utf8(msg) else {
        return true;
    };

    matches!(
        timeout(WRITE_WAIT, sink.send(Message::Text(text))).await,
        Ok(Ok(()))
    )
}

/// Enforce liveness and discard inbound frames.
///
/// Any frame (pongs included; the server answers pings itself) refreshes
/// the deadline. Silence past the deadline, a socket error, or a clean
/// close unregisters the subscriber.
async fn read_pump(mut stream: SplitStream<WebSocket>, hub: Arc<Hub>, id: u64) {
    loop {
        match timeout(PONG_WAIT, stream.next()).await {
            Ok(Some(Ok(_frame))) => {}
            _ => break,
        }
    }

    hub.remove_client(id).await;
}
