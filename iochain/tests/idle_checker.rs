mod common;

use common::{ManualProcessor, RecordingHandler, connector_with_config, wait_until};
use iochain::{DummyProcessor, IdleStatus, SessionConfig};
use std::time::Duration;

#[test]
fn background_thread_fires_idle_events() {
    let _ = env_logger::builder().is_test(true).try_init();

    let handler = RecordingHandler::new();
    let mut config = SessionConfig::default();
    config.set_idle_time(IdleStatus::BothIdle, 1);
    let (service, checker) = connector_with_config(handler.clone(), config);
    checker.start().unwrap();

    let session = service
        .new_session(std::sync::Arc::new(DummyProcessor::new()), None, None)
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        handler.count("idle both idle") > 0
    }));
    assert!(session.idle_count(IdleStatus::BothIdle) > 0);
    assert!(
        handler
            .thread_names()
            .iter()
            .any(|name| name == "IdleStatusChecker")
    );

    checker.stop();
    assert!(!checker.is_running());
}

#[test]
fn closed_sessions_leave_the_checker() {
    let handler = RecordingHandler::new();
    let (service, checker) = connector_with_config(handler, SessionConfig::default());

    let first = service.new_session(ManualProcessor::new(), None, None).unwrap();
    let second = service.new_session(ManualProcessor::new(), None, None).unwrap();
    assert_eq!(checker.session_count(), 2);

    first.close_now();
    assert_eq!(checker.session_count(), 1);

    second.close_now();
    assert_eq!(checker.session_count(), 0);
    assert_eq!(checker.service_count(), 0);
}
