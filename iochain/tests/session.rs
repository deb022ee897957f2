mod common;

use common::{ManualProcessor, RecordingHandler, connector, connector_with_config};
use iochain::{
    DummyProcessor, Error, IdleStatus, IoSession, Message, SessionConfig, SessionState,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn new_session_fires_created_then_opened() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler.clone());
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();

    assert_eq!(handler.events(), vec!["created", "opened"]);
    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.is_active());
    assert!(Arc::ptr_eq(session.service(), &service));
}

#[test]
fn sessions_compare_by_id() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler);
    let a = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();
    let b = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();

    assert_ne!(a.id(), b.id());
    assert!(b.id() > a.id());
    assert_eq!(*a, *service.listeners().managed_session(a.id()).unwrap());
    assert_ne!(*a, *b);
}

#[test]
fn concurrent_close_is_idempotent() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler.clone());
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                session.close_now()
            })
        })
        .collect();
    let futures: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for future in &futures {
        assert!(future.ptr_eq(&futures[0]));
        assert!(future.await_timeout(Duration::from_secs(5)));
    }
    assert_eq!(handler.count("closed"), 1);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(service.managed_session_count(), 0);
}

#[test]
fn write_after_close_fails_immediately() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler.clone());
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();
    session.close_now().await_uninterruptibly();
    assert_eq!(handler.count("exception"), 0);

    let future = session.write("late");
    assert!(future.is_done());
    assert!(matches!(
        future.exception().as_deref(),
        Some(Error::WriteToClosedSession { requests: 1, .. })
    ));

    // the handler sees the very error the future failed with
    assert_eq!(handler.count("exception"), 1);
    let reported = handler.errors();
    assert!(Arc::ptr_eq(&reported[0], &future.exception().unwrap()));
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn close_on_flush_waits_for_queued_writes() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler.clone());
    let processor = ManualProcessor::new();
    let session = service.new_session(processor.clone(), None, None).unwrap();

    let first = session.write("one");
    let second = session.write("two");
    let close = session.close_on_flush();
    assert!(!close.is_closed());
    assert!(session.is_active());

    processor.complete(&session, 1);
    assert!(first.is_written());
    assert!(!close.is_closed());

    processor.complete(&session, 2);
    assert!(second.is_written());
    assert!(close.is_closed());
    assert_eq!(handler.count("sent"), 2);
    assert_eq!(handler.count("closed"), 1);
    assert_eq!(handler.count("exception"), 0);
}

#[test]
fn input_closed_closes_by_default() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler.clone());
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();

    session.filter_chain().fire_input_closed();

    assert!(session.close_future().is_closed());
    assert_eq!(handler.count("input closed"), 1);
    assert_eq!(handler.count("closed"), 1);
}

#[test]
fn idle_counts_grow_per_tick_and_reset_on_activity() {
    let handler = RecordingHandler::new();
    let mut config = SessionConfig::default();
    config.set_idle_time(IdleStatus::ReaderIdle, 1);
    let (service, checker) = connector_with_config(handler.clone(), config);
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();
    let t0 = session.last_read_time();

    checker.tick(t0 + 500);
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 0);

    checker.tick(t0 + 1_500);
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 1);
    assert_eq!(session.last_idle_time(IdleStatus::ReaderIdle), t0 + 1_500);

    checker.tick(t0 + 2_500);
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 2);
    assert_eq!(handler.count("idle reader idle"), 2);

    session.increase_read_bytes(10, t0 + 2_600);
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 0);

    checker.tick(t0 + 3_000);
    assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 0);
    assert_eq!(handler.count("idle reader idle"), 2);
    assert_eq!(handler.count("idle writer idle"), 0);
    assert_eq!(handler.count("idle both idle"), 0);
}

#[test]
fn write_timeout_fails_pending_writes_and_closes() {
    let handler = RecordingHandler::new();
    let mut config = SessionConfig::default();
    config.set_write_timeout(1);
    let (service, checker) = connector_with_config(handler.clone(), config);
    let processor = ManualProcessor::new();
    let session = service.new_session(processor, None, None).unwrap();
    let t0 = session.last_write_time();

    let stuck = session.write("stuck");
    let queued = session.write("queued");

    checker.tick(t0 + 500);
    assert!(!stuck.is_done());

    checker.tick(t0 + 1_500);
    assert!(matches!(
        stuck.exception().as_deref(),
        Some(Error::WriteTimeout { .. })
    ));
    assert!(matches!(
        queued.exception().as_deref(),
        Some(Error::WriteToClosedSession { .. })
    ));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(handler.count("exception"), 2);
    assert_eq!(handler.count("closed"), 1);
    assert_eq!(checker.session_count(), 0);
}

#[test]
fn a_single_stuck_write_times_out() {
    let handler = RecordingHandler::new();
    let mut config = SessionConfig::default();
    config.set_write_timeout(2);
    let (service, checker) = connector_with_config(handler.clone(), config);
    let session = service.new_session(ManualProcessor::new(), None, None).unwrap();
    let t0 = session.last_write_time();

    let stuck = session.write("never acknowledged");
    assert!(session.is_write_queue_empty());

    checker.tick(t0 + 1_900);
    assert!(!stuck.is_done());
    assert!(session.is_active());

    checker.tick(t0 + 2_100);
    assert!(matches!(
        stuck.exception().as_deref(),
        Some(Error::WriteTimeout { .. })
    ));
    assert_eq!(handler.count("exception"), 1);
    assert!(session.close_future().is_closed());
}

#[test]
fn write_timeout_counts_from_when_the_write_went_in_flight() {
    let handler = RecordingHandler::new();
    let mut config = SessionConfig::default();
    config.set_write_timeout(2);
    let (service, checker) = connector_with_config(handler.clone(), config);
    let processor = ManualProcessor::new();
    let session = service.new_session(processor.clone(), None, None).unwrap();
    let t0 = session.last_write_time();

    // a long quiet spell with nothing to write
    checker.tick(t0 + 10_000);
    assert!(session.is_active());

    processor.set_now(t0 + 10_000);
    let fresh = session.write("fresh");
    assert_eq!(session.current_write_since(), Some(t0 + 10_000));

    checker.tick(t0 + 10_500);
    assert!(!fresh.is_done());
    assert!(session.is_active());
    assert_eq!(handler.count("exception"), 0);

    checker.tick(t0 + 12_100);
    assert!(matches!(
        fresh.exception().as_deref(),
        Some(Error::WriteTimeout { .. })
    ));
    assert!(session.close_future().is_closed());
}

#[test]
fn partial_progress_postpones_the_write_timeout() {
    let handler = RecordingHandler::new();
    let mut config = SessionConfig::default();
    config.set_write_timeout(2);
    let (service, checker) = connector_with_config(handler, config);
    let processor = ManualProcessor::new();
    let session = service.new_session(processor.clone(), None, None).unwrap();
    let t0 = session.last_write_time();

    processor.set_now(t0);
    let large = session.write(Message::from(vec![0u8; 64]));
    processor.write_partially(&session, 16, t0 + 1_500);

    checker.tick(t0 + 2_500);
    assert!(!large.is_done());

    checker.tick(t0 + 3_600);
    assert!(matches!(
        large.exception().as_deref(),
        Some(Error::WriteTimeout { .. })
    ));
}

#[test]
fn scheduled_writes_settle_after_completion() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler);
    let processor = ManualProcessor::new();
    let session = service.new_session(processor.clone(), None, None).unwrap();

    session.write(Message::from(vec![0u8; 5]));
    session.write(Message::from(vec![0u8; 7]));
    session.write(Message::from(vec![0u8; 11]));
    assert_eq!(session.scheduled_write_bytes(), 23);
    assert_eq!(session.scheduled_write_messages(), 3);
    assert_eq!(service.scheduled_write_bytes(), 23);

    // the first request goes out in two pieces
    processor.write_partially(&session, 2, 1);
    assert_eq!(session.scheduled_write_bytes(), 21);
    assert_eq!(session.scheduled_write_messages(), 3);
    processor.complete_remaining(&session, 3, 2);
    assert_eq!(session.scheduled_write_bytes(), 18);
    assert_eq!(session.scheduled_write_messages(), 2);

    processor.complete(&session, 3);
    processor.complete(&session, 4);
    assert_eq!(session.scheduled_write_bytes(), 0);
    assert_eq!(session.scheduled_write_messages(), 0);
    assert_eq!(service.scheduled_write_bytes(), 0);
    assert_eq!(service.scheduled_write_messages(), 0);
    assert_eq!(session.written_bytes(), 23);
    assert_eq!(session.written_messages(), 3);
}

#[test]
fn close_resets_the_backlog() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler);
    let processor = ManualProcessor::new();
    let session = service.new_session(processor, None, None).unwrap();

    let in_flight = session.write(Message::from(vec![0u8; 4]));
    let queued = session.write(Message::from(vec![0u8; 6]));
    assert_eq!(service.scheduled_write_bytes(), 10);

    session.close_now().await_uninterruptibly();

    assert!(in_flight.exception().is_some());
    assert!(queued.exception().is_some());
    assert_eq!(session.scheduled_write_bytes(), 0);
    assert_eq!(session.scheduled_write_messages(), 0);
    assert_eq!(service.scheduled_write_bytes(), 0);
    assert_eq!(service.scheduled_write_messages(), 0);
}

#[test]
fn traffic_counters_feed_the_service() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler.clone());
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();

    session
        .filter_chain()
        .fire_message_received(Message::from(vec![1u8; 8]));
    session.write(Message::from(vec![2u8; 3]));

    assert_eq!(session.read_bytes(), 8);
    assert_eq!(session.read_messages(), 1);
    assert_eq!(session.written_bytes(), 3);
    assert_eq!(session.written_messages(), 1);
    assert_eq!(service.statistics().read_bytes(), 8);
    assert_eq!(service.statistics().written_messages(), 1);
    assert_eq!(handler.received()[0].byte_len(), 8);
}

#[test]
fn throughput_is_computed_per_interval() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler);
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();
    let t0 = session.statistics().last_throughput_calculation_time();

    session.increase_read_bytes(3_000, t0 + 100);
    assert!(!session.update_throughput(t0 + 1_000, false));
    assert!(session.update_throughput(t0 + 3_000, false));
    assert_eq!(session.throughput().read_bytes, 1_000.0);
    assert_eq!(session.largest_throughput().read_bytes, 1_000.0);
}

#[test]
fn typed_attributes() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler);
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();

    assert!(session.set_attribute("user", String::from("alice")).is_none());
    assert_eq!(
        session.attribute::<String>("user").as_deref().map(String::as_str),
        Some("alice")
    );
    assert!(session.attribute::<u32>("user").is_none());

    let existing = session.set_attribute_if_absent("user", String::from("bob"));
    assert!(existing.is_some());
    assert_eq!(*session.attribute::<String>("user").unwrap(), "alice");

    assert!(session.contains_attribute("user"));
    assert_eq!(session.attribute_keys(), vec!["user".to_string()]);
    assert!(session.remove_attribute("user").is_some());
    assert!(!session.contains_attribute("user"));
}

#[test]
fn suspend_notifies_the_transport_only_while_connected() {
    let handler = RecordingHandler::new();
    let (service, _checker) = connector(handler);
    let processor = ManualProcessor::new();
    let session = service.new_session(processor.clone(), None, None).unwrap();

    session.suspend_read();
    session.suspend_write();
    assert!(session.is_read_suspended());
    assert!(session.is_write_suspended());
    assert_eq!(processor.traffic_control_updates(), 2);

    // a suspended session queues writes without handing them out
    session.write("held");
    assert!(session.current_write_request().is_none());
    assert_eq!(session.write_queue_len(), 1);

    session.resume_write();
    assert_eq!(processor.traffic_control_updates(), 3);

    session.close_now().await_uninterruptibly();
    session.resume_read();
    assert!(!session.is_read_suspended());
    assert_eq!(processor.traffic_control_updates(), 3);
}

#[test]
fn config_is_copied_from_the_service() {
    let handler = RecordingHandler::new();
    let mut config = SessionConfig::default();
    config.set_idle_time(IdleStatus::BothIdle, 30);
    let (service, _checker) = connector_with_config(handler, config);
    let session = service
        .new_session(Arc::new(DummyProcessor::new()), None, None)
        .unwrap();

    session.update_config(|c| {
        c.set_write_timeout(5);
    });

    assert_eq!(session.config().idle_time(IdleStatus::BothIdle), 30);
    assert_eq!(session.config().write_timeout(), 5);
    assert_eq!(service.session_config().write_timeout(), 60);
}

fn _assert_send_sync() {
    fn check<T: Send + Sync>() {}
    check::<IoSession>();
}
