mod common;

use common::{ManualProcessor, RecordingHandler, connector};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn write_future_resolves_when_the_transport_finishes() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler);
    let processor = ManualProcessor::new();
    let session = service.new_session(processor.clone(), None, None).unwrap();

    let future = session.write("async");
    assert!(!future.is_done());

    let completer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            processor.complete(&session, 1);
        })
    };

    let result = tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .unwrap();
    assert!(result.is_ok());
    completer.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn close_future_resolves_on_close() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler);
    let session = service.new_session(ManualProcessor::new(), None, None).unwrap();

    let closed = session.close_future().clone();
    let closer = tokio::task::spawn_blocking(move || {
        std::thread::sleep(Duration::from_millis(20));
        session.close_now();
    });

    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .unwrap();
    closer.await.unwrap();
}
