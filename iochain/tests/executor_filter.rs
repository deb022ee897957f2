mod common;

use common::{RecordingHandler, connector, wait_until};
use iochain::{
    DummyProcessor, ExecutorBuilder, ExecutorFilter, IoEventType, IoSession, Message,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn sequence(handler: &RecordingHandler) -> Vec<u32> {
    handler
        .received()
        .iter()
        .map(|m| *m.downcast_ref::<u32>().unwrap())
        .collect()
}

fn open(handler: &Arc<RecordingHandler>, filter: ExecutorFilter) -> Arc<IoSession> {
    let (service, _checker) = connector(handler.clone());
    service
        .filter_chain()
        .add_last("executor", Arc::new(filter))
        .unwrap();
    service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap()
}

#[test]
fn events_of_one_session_keep_their_order() {
    let handler = RecordingHandler::new();
    let session = open(&handler, ExecutorFilter::with_max_threads(4));

    for i in 0..200u32 {
        session.filter_chain().fire_message_received(Message::object(i));
    }

    assert!(wait_until(Duration::from_secs(5), || handler.received().len() == 200));
    assert_eq!(sequence(&handler), (0..200).collect::<Vec<_>>());
}

#[test]
fn selected_events_run_on_the_pool() {
    let handler = RecordingHandler::new();
    let session = open(&handler, ExecutorFilter::new());

    session
        .filter_chain()
        .fire_message_received(Message::object(7u32));
    assert!(wait_until(Duration::from_secs(5), || handler.count("received") == 1));

    let events = handler.events();
    let names = handler.thread_names();
    // session_created is never handed off
    assert_eq!(events[0], "created");
    assert!(!names[0].starts_with("iochain-filter"));
    let received = events.iter().position(|e| e == "received").unwrap();
    assert!(names[received].starts_with("iochain-filter"));
}

#[test]
fn unselected_events_stay_on_the_caller() {
    let handler = RecordingHandler::new();
    let session = open(
        &handler,
        ExecutorFilter::new().event_types(&[IoEventType::SessionIdle]),
    );

    session
        .filter_chain()
        .fire_message_received(Message::object(1u32));

    // delivered synchronously, no waiting needed
    assert_eq!(handler.count("received"), 1);
    let current = thread::current().name().map(str::to_owned);
    assert_eq!(handler.thread_names().last().cloned(), current);
}

#[test]
fn shared_executor_serves_many_sessions() {
    let handler = RecordingHandler::new();
    let pool = Arc::new(ExecutorBuilder::new().name("shared-pool").max_threads(2).build());
    let (service, _checker) = connector(handler.clone());
    service
        .filter_chain()
        .add_last("executor", Arc::new(ExecutorFilter::with_executor(pool)))
        .unwrap();

    let sessions: Vec<_> = (0..4)
        .map(|_| {
            service
                .new_session(Arc::new(DummyProcessor::new()), None, None)
                .unwrap()
        })
        .collect();
    for session in &sessions {
        for i in 0..10u32 {
            session.filter_chain().fire_message_received(Message::object(i));
        }
    }

    assert!(wait_until(Duration::from_secs(5), || handler.received().len() == 40));
    assert!(handler
        .thread_names()
        .iter()
        .any(|n| n.starts_with("shared-pool")));
}
