//! End-to-end tests: a publisher and a reader sharing one mailbox directory.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, json};
use simbridge::{
    CommandStatus, HostError, Mailbox, OutcomeStatus, PublishOutcome, Publisher, PublisherConfig,
    RESET_STATE_ACTION, Reader, ReaderConfig, RunFingerprint, ScreenshotOutcome, SimulationHost,
    SimulationMode, SimulationVerb, StateView, Throttle, UnsupportedAutomation,
};

/// Host that records what it was asked to do.
#[derive(Debug, Default)]
struct TestHost {
    mode: Option<SimulationMode>,
    resets: u64,
    sim_time: f64,
}

impl SimulationHost for TestHost {
    fn set_mode(&mut self, mode: SimulationMode) -> Result<(), HostError> {
        self.mode = Some(mode);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), HostError> {
        self.resets += 1;
        self.sim_time = 0.0;
        Ok(())
    }

    fn export_image(&mut self, path: &std::path::Path, _quality: u8) -> Result<(), HostError> {
        std::fs::write(path, b"\x89PNG").map_err(|e| HostError::Failed(e.to_string()))
    }

    fn run_fingerprint(&self) -> RunFingerprint {
        RunFingerprint {
            sim_time: Some(self.sim_time),
            reset_count: Some(self.resets),
        }
    }
}

fn setup(throttle: u32) -> (tempfile::TempDir, Publisher<TestHost>, Reader) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mailbox = Mailbox::open(dir.path().join("data")).expect("open mailbox");
    let config = PublisherConfig {
        throttle: Throttle::Steps(NonZeroU32::new(throttle).unwrap()),
        ..PublisherConfig::default()
    };
    let publisher = Publisher::new(mailbox.clone(), TestHost::default(), config);
    let reader = Reader::new(
        mailbox,
        ReaderConfig {
            screenshot_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            ..ReaderConfig::default()
        },
    );
    (dir, publisher, reader)
}

#[test]
fn read_before_first_publish_returns_no_data() {
    let (_dir, _publisher, reader) = setup(5);
    assert!(matches!(reader.state(), StateView::NoData { .. }));
    assert!(reader.full_state().is_err());
    assert!(reader.logs(10, None).is_empty());
}

#[test]
fn forced_publish_round_trips_fields() {
    let (_dir, mut publisher, reader) = setup(5);
    publisher.publish(&json!({"mode": "idle"}), true);
    let before = reader.state().into_result().unwrap().snapshot.sequence;

    let outcome = publisher.publish(&json!({"pose": [1.0, 2.0, 0.5], "mode": "navigate"}), true);
    assert!(matches!(outcome, PublishOutcome::Written { .. }));

    let view = reader.state().into_result().unwrap();
    assert!(view.snapshot.sequence > before);
    assert_eq!(view.snapshot.get("pose"), Some(&json!([1.0, 2.0, 0.5])));
    assert_eq!(view.snapshot.get("mode"), Some(&json!("navigate")));
    assert!(!view.stale);
}

#[test]
fn throttle_bounds_durable_writes() {
    let (_dir, mut publisher, reader) = setup(5);
    let mut sequences = Vec::new();
    for step in 0..20 {
        publisher.publish(&json!({"step": step}), false);
        sequences.push(reader.state().into_result().unwrap().snapshot.sequence);
    }
    // One write per five calls, starting with the first.
    assert_eq!(sequences.iter().max(), Some(&4));
    for window in sequences.chunks(5) {
        assert!(window.iter().all(|s| *s == window[0]));
    }

    assert_eq!(
        publisher.publish(&json!({}), true),
        PublishOutcome::Written { sequence: 5 }
    );
}

#[test]
fn sequence_is_monotonic_until_reload() {
    let (_dir, mut publisher, reader) = setup(1);
    publisher.detect_reload();

    let mut last = 0;
    for _ in 0..10 {
        publisher.publish(&json!({}), false);
        let seq = reader.state().into_result().unwrap().snapshot.sequence;
        assert!(seq > last);
        last = seq;
    }

    publisher.host_mut().reset().unwrap();
    assert!(publisher.detect_reload().is_some());
    publisher.publish(&json!({}), false);
    let view = reader.state().into_result().unwrap();
    assert!(view.snapshot.sequence <= last);
    assert_eq!(view.snapshot.epoch, 1);
}

#[test]
fn reload_callbacks_fire_once_per_reload() {
    let (_dir, mut publisher, _reader) = setup(5);
    let fired = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&fired);
    publisher.on_reload(move |event| {
        seen.lock().unwrap().push(event.epoch);
        Ok(())
    });

    publisher.host_mut().sim_time = 10.0;
    publisher.detect_reload();
    publisher.host_mut().reset().unwrap();
    publisher.detect_reload();
    publisher.detect_reload();

    assert_eq!(*fired.lock().unwrap(), vec![1]);
}

#[test]
fn last_command_wins_before_claim() {
    let (_dir, mut publisher, reader) = setup(5);
    let first = reader
        .send_command("simulation", json!({"command": "pause"}).as_object().cloned().unwrap())
        .unwrap();
    let second = reader
        .send_command("simulation", json!({"command": "fast"}).as_object().cloned().unwrap())
        .unwrap();

    let claimed = publisher.process_commands().unwrap();
    assert_eq!(claimed.id, second.id);
    assert_eq!(publisher.host().mode, Some(SimulationMode::Fast));
    assert_eq!(reader.command_status(&first.id), CommandStatus::Unknown);
    assert!(publisher.process_commands().is_none());
}

#[test]
fn unknown_command_does_not_block_next() {
    let (_dir, mut publisher, reader) = setup(5);
    let unknown = reader.send_command("does_not_exist", Map::new()).unwrap();
    publisher.process_commands();

    let CommandStatus::Completed { outcome, .. } = reader.command_status(&unknown.id) else {
        panic!("expected a completed command");
    };
    assert_eq!(outcome.status, OutcomeStatus::UnknownAction);
    let warnings = reader.logs(10, Some("does_not_exist"));
    assert_eq!(warnings.len(), 1);

    let next = reader.reset_controller_state().unwrap();
    publisher.register_command(RESET_STATE_ACTION, |ctx, _| {
        ctx.log("controller state cleared");
        Ok("cleared".to_string())
    });
    assert_eq!(publisher.process_commands().unwrap().id, next.id);
    let CommandStatus::Completed { outcome, .. } = reader.command_status(&next.id) else {
        panic!("expected a completed command");
    };
    assert_eq!(outcome.status, OutcomeStatus::Handled);
    assert_eq!(outcome.detail, "cleared");
}

#[test]
fn pending_command_waits_for_a_step() {
    let (_dir, _publisher, reader) = setup(5);
    let cmd = reader.reset_controller_state().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert!(matches!(reader.command_status(&cmd.id), CommandStatus::Pending(_)));
}

#[tokio::test]
async fn simulation_control_reaches_host() {
    let (_dir, mut publisher, reader) = setup(5);
    let automation = UnsupportedAutomation::current();
    reader
        .simulation_control(SimulationVerb::Pause, false, &automation)
        .await
        .unwrap();
    publisher.process_commands();
    assert_eq!(publisher.host().mode, Some(SimulationMode::Paused));
    assert_eq!(reader.logs(1, None)[0].message, "Simulation: pause");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn screenshot_is_captured_while_controller_steps() {
    let (_dir, mut publisher, reader) = setup(5);

    let controller = std::thread::spawn(move || {
        for _ in 0..200 {
            if publisher.process_commands().is_some() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    });

    let outcome = reader.take_screenshot().await.unwrap();
    controller.join().unwrap();
    let ScreenshotOutcome::Captured(info) = outcome else {
        panic!("expected a captured screenshot");
    };
    assert_eq!(reader.latest_screenshot().unwrap().path, info.path);
}

#[test]
fn reads_never_see_a_partial_snapshot() {
    let (_dir, mut publisher, reader) = setup(5);
    publisher.publish(&json!({"n": 0}), true);

    let writer = std::thread::spawn(move || {
        for n in 1..=400 {
            let outcome = publisher.publish(&json!({"n": n, "padding": "x".repeat(512)}), true);
            assert!(matches!(outcome, PublishOutcome::Written { .. }));
        }
    });

    let mut last = 0;
    let mut reads = 0;
    while !writer.is_finished() || reads == 0 {
        match reader.state() {
            StateView::Snapshot(view) => {
                assert!(view.snapshot.sequence >= last, "sequence went backwards");
                last = view.snapshot.sequence;
            }
            StateView::NoData { reason } => panic!("read a broken snapshot: {reason}"),
        }
        reads += 1;
    }
    writer.join().unwrap();
    assert_eq!(reader.state().into_result().unwrap().snapshot.sequence, 401);
}
