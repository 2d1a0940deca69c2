// Integration tests for the broadcast hub

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use ctlstream::hub::{FieldFilter, Hub, CLIENT_QUEUE_CAPACITY};

fn record(i: usize) -> Vec<u8> {
    format!("{{\"source\":\"L\",\"timestamp\":{}}}\n", i).into_bytes()
}

async fn start_hub() -> (Arc<Hub>, CancellationToken) {
    let (hub, ingress) = Hub::new();
    let cancel = CancellationToken::new();
    tokio::spawn(Arc::clone(&hub).run(ingress, cancel.clone()));
    (hub, cancel)
}

#[tokio::test]
async fn test_fast_subscriber_receives_all_in_order_slow_is_evicted() {
    let (hub, cancel) = start_hub().await;

    let (_fast_id, mut fast_rx) = hub.register(None, None).await;
    let (_slow_id, mut slow_rx) = hub.register(None, None).await;

    let publisher = Arc::clone(&hub);
    let feed = tokio::spawn(async move {
        for i in 0..300 {
            publisher.publish(record(i)).await.unwrap();
            // Pace the feed so the draining subscriber never lags by more
            // than a fraction of its queue.
            if i % 32 == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    });

    // The fast subscriber drains everything, in publish order.
    let mut received = Vec::new();
    while received.len() < 300 {
        let msg = timeout(Duration::from_secs(5), fast_rx.recv())
            .await
            .expect("fast subscriber starved")
            .expect("fast subscriber dropped");
        received.push(msg);
    }

    for (i, msg) in received.iter().enumerate() {
        assert_eq!(msg, &record(i));
    }

    feed.await.unwrap();

    // The slow subscriber never drained: its queue filled and the hub
    // evicted it instead of blocking.
    assert_eq!(hub.client_count().await, 1);

    let mut slow_received = 0;
    while let Ok(Some(_)) = timeout(Duration::from_secs(1), slow_rx.recv()).await {
        slow_received += 1;
    }
    assert!(slow_received <= CLIENT_QUEUE_CAPACITY);

    cancel.cancel();
}

#[tokio::test]
async fn test_filtered_subscriber_receives_projection() {
    let (hub, cancel) = start_hub().await;

    let filter = FieldFilter::parse("subject.CN,source");
    let (_id, mut rx) = hub.register(filter, None).await;

    let msg =
        b"{\"subject\":{\"CN\":\"a\",\"O\":[\"x\"]},\"issuer\":{\"CN\":\"b\"},\"source\":\"L\",\"timestamp\":1}\n";
    hub.publish(msg.to_vec()).await.unwrap();

    let delivered = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        String::from_utf8(delivered).unwrap(),
        "{\"subject\":{\"CN\":\"a\"},\"source\":\"L\"}\n"
    );

    cancel.cancel();
}

#[tokio::test]
async fn test_intermediate_only_filter_keeps_whole_object() {
    let (hub, cancel) = start_hub().await;

    let (_id, mut rx) = hub.register(FieldFilter::parse("subject"), None).await;

    let msg =
        b"{\"subject\":{\"CN\":\"a\",\"O\":[\"x\"]},\"issuer\":{\"CN\":\"b\"},\"source\":\"L\",\"timestamp\":1}\n";
    hub.publish(msg.to_vec()).await.unwrap();

    let delivered = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        String::from_utf8(delivered).unwrap(),
        "{\"subject\":{\"CN\":\"a\",\"O\":[\"x\"]}}\n"
    );

    cancel.cancel();
}

#[tokio::test]
async fn test_projection_failure_skips_message_but_keeps_subscriber() {
    let (hub, cancel) = start_hub().await;

    let (_id, mut rx) = hub.register(FieldFilter::parse("source"), None).await;

    // Unparseable record: skipped for this subscriber, no eviction.
    hub.publish(b"not json\n".to_vec()).await.unwrap();
    hub.publish(b"{\"source\":\"L\"}\n".to_vec()).await.unwrap();

    let delivered = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(String::from_utf8(delivered).unwrap(), "{\"source\":\"L\"}\n");
    assert_eq!(hub.client_count().await, 1);

    cancel.cancel();
}

#[tokio::test]
async fn test_unfiltered_subscriber_receives_verbatim_bytes() {
    let (hub, cancel) = start_hub().await;

    let (_id, mut rx) = hub.register(None, None).await;

    let msg = b"{\"timestamp\":1,\"source\":\"L\"}\n".to_vec();
    hub.publish(msg.clone()).await.unwrap();

    let delivered = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered, msg);

    cancel.cancel();
}

#[tokio::test]
async fn test_disconnected_subscriber_is_pruned_on_dispatch() {
    let (hub, cancel) = start_hub().await;

    let (_id, rx) = hub.register(None, None).await;
    drop(rx);

    hub.publish(record(0)).await.unwrap();

    // Give the dispatcher a moment to notice the closed queue.
    timeout(Duration::from_secs(5), async {
        while hub.client_count().await != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("closed subscriber was not pruned");

    cancel.cancel();
}
