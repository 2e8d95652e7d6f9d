use super::*;
use shared::protocol::RemoteEvent;

#[tokio::test]
async fn delivers_events_in_publish_order() {
    let (publisher, mut stream) = EventStream::channel(8);

    assert!(publisher.publish(RemoteEvent::Connecting { attempt: 1 }).await);
    assert!(publisher.publish(RemoteEvent::Hello).await);

    assert!(matches!(
        stream.next().await,
        Some(RemoteEvent::Connecting { attempt: 1 })
    ));
    assert!(matches!(stream.next().await, Some(RemoteEvent::Hello)));
}

#[tokio::test]
async fn stream_ends_when_publisher_is_dropped() {
    let (publisher, mut stream) = EventStream::channel(8);
    assert!(publisher.publish(RemoteEvent::Hello).await);
    drop(publisher);

    assert!(matches!(stream.next().await, Some(RemoteEvent::Hello)));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn publish_reports_closed_consumer() {
    let (publisher, stream) = EventStream::channel(8);
    drop(stream);

    assert!(!publisher.publish(RemoteEvent::Hello).await);
}
