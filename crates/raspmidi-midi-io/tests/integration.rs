//! Integration tests for raspmidi-midi-io.
//!
//! Everything runs against `VirtualBackend`, so no MIDI hardware is needed.

use std::time::{Duration, Instant};

use chrono::Utc;
use raspmidi_core::{Patch, PatchFields};
use raspmidi_midi_io::{
    DispatchOutcome, Error, MidiCommand, MidiSystem, MonitorMode, ReceivedKind, VirtualBackend,
};

const ZOOM: &str = "Zoom G3X";
const CHOCOLATE: &str = "Chocolate";

fn rig() -> VirtualBackend {
    VirtualBackend::new()
        .with_output(ZOOM)
        .with_input(ZOOM)
        .with_input(CHOCOLATE)
}

fn system(backend: &VirtualBackend) -> MidiSystem {
    MidiSystem::builder()
        .backend(backend.clone())
        .inter_frame_delay(Duration::ZERO)
        .operation_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

async fn scanned(backend: &VirtualBackend) -> MidiSystem {
    let midi = system(backend);
    midi.registry().scan().await.unwrap();
    midi
}

fn pc(program: i64) -> MidiCommand {
    MidiCommand::ProgramChange {
        channel: 0,
        program,
    }
}

// ---------------------------------------------------------------------------
// 1. Scan and status
// ---------------------------------------------------------------------------

/// A scan lists every port and opens every output.
#[tokio::test]
async fn test_scan_lists_inputs_and_outputs() {
    let backend = rig();
    let midi = scanned(&backend).await;

    let list = midi.registry().list();
    assert_eq!(list.inputs.len(), 2);
    assert_eq!(list.outputs.len(), 1);
    assert!(list.outputs[0].connected);
    assert_eq!(list.outputs[0].name, "zoom_g3x");
    assert_eq!(list.inputs[1].name, "chocolate");
}

/// A device plugged after the first scan shows up only after the next one.
#[tokio::test]
async fn test_newly_plugged_device_needs_scan() {
    let backend = rig();
    let midi = scanned(&backend).await;

    backend.add_port(raspmidi_midi_io::PortType::Output, "Looper");
    assert!(matches!(
        midi.registry().status("looper"),
        Err(Error::DeviceNotFound(_))
    ));

    midi.registry().scan().await.unwrap();
    assert!(midi.registry().status("looper").unwrap().connected);
}

// ---------------------------------------------------------------------------
// 2. Dispatch
// ---------------------------------------------------------------------------

/// Unknown outputs fail in resolution and nothing reaches the wire.
#[tokio::test]
async fn test_dispatch_to_unknown_device() {
    let backend = rig();
    let midi = scanned(&backend).await;

    let result = midi.dispatcher().send("nope", pc(1)).await;
    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    assert!(backend.sent().is_empty());

    let log = midi.command_log().entries(0);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].outcome, DispatchOutcome::Failed);
}

/// Disconnected outputs are rejected without sending and without retrying.
#[tokio::test]
async fn test_dispatch_to_disconnected_device() {
    let backend = rig();
    let midi = scanned(&backend).await;

    backend.set_responsive(ZOOM, false);
    midi.registry().health_check().await.unwrap();
    backend.set_responsive(ZOOM, true);

    let result = midi.dispatcher().send("zoom_g3x", pc(1)).await;
    assert!(matches!(result, Err(Error::DeviceDisconnected(_))));
    assert!(backend.sent().is_empty());
}

/// Scenario "Clean": bank B slot 5 is global 15 and activates as PC 15.
#[tokio::test]
async fn test_clean_patch_activation() {
    let backend = rig();
    let midi = scanned(&backend).await;

    let fields: PatchFields = serde_json::from_value(serde_json::json!({
        "name": "Clean",
        "input_device": "chocolate",
        "output_device": "zoom_g3x",
        "input_channel": 1,
        "command_type": "pc",
        "zoom_bank": "B",
        "zoom_patch": 15
    }))
    .unwrap();
    let patch = Patch::new(1, fields.validate().unwrap(), Utc::now());
    assert_eq!(raspmidi_core::bank::decode(15).unwrap(), ('B', 5));

    let report = midi.dispatcher().activate(&patch).await.unwrap();
    assert_eq!(report.frames, vec!["C0 0F"]);
    assert_eq!(backend.sent_to(ZOOM), vec![vec![0xC0, 0x0F]]);
    assert_eq!(midi.registry().status("zoom_g3x").unwrap().last_pc, Some(15));
}

/// Frames of one batch are spaced by the configured delay.
#[tokio::test]
async fn test_batch_spacing() {
    let backend = rig();
    let midi = MidiSystem::builder()
        .backend(backend.clone())
        .inter_frame_delay(Duration::from_millis(20))
        .build()
        .unwrap();
    midi.registry().scan().await.unwrap();

    let started = Instant::now();
    midi.dispatcher()
        .dispatch("zoom_g3x", vec![pc(1), pc(2), pc(3)])
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(backend.sent_to(ZOOM).len(), 3);
}

/// A timed-out effects batch stops at a frame boundary; frames already sent
/// stay sent and the device keeps working afterwards.
#[tokio::test]
async fn test_effects_batch_cancelled_at_frame_boundary() {
    let backend = rig();
    let midi = MidiSystem::builder()
        .backend(backend.clone())
        .inter_frame_delay(Duration::ZERO)
        .operation_timeout(Duration::from_millis(250))
        .build()
        .unwrap();
    midi.registry().scan().await.unwrap();
    backend.set_send_delay(Duration::from_millis(100));

    let toggles: Vec<_> = (0..6)
        .map(|block| MidiCommand::EffectToggle {
            block,
            enabled: false,
        })
        .collect();
    let result = midi.dispatcher().dispatch("zoom_g3x", toggles).await;
    assert!(matches!(result, Err(Error::Timeout { .. })));

    // Let the worker reach the next boundary
    tokio::time::sleep(Duration::from_millis(400)).await;
    let sent = backend.sent_to(ZOOM);
    assert!(!sent.is_empty() && sent.len() < 6, "sent {} frames", sent.len());
    assert!(sent.iter().all(|frame| frame[0] == 0xF0 && frame[11] == 0xF7));

    backend.set_send_delay(Duration::ZERO);
    backend.clear_sent();
    midi.dispatcher().send("zoom_g3x", pc(4)).await.unwrap();
    assert_eq!(backend.sent_to(ZOOM), vec![vec![0xC0, 4]]);
}

/// Concurrent batches to one device reach the wire one after the other.
#[tokio::test]
async fn test_batches_to_one_device_never_interleave() {
    let backend = rig();
    let midi = scanned(&backend).await;
    backend.set_send_delay(Duration::from_millis(10));

    let batch = |program| (0..5).map(|_| pc(program)).collect::<Vec<_>>();
    let (first, second) = tokio::join!(
        midi.dispatcher().dispatch("zoom_g3x", batch(1)),
        midi.dispatcher().dispatch("zoom_g3x", batch(2)),
    );
    first.unwrap();
    second.unwrap();

    let programs: Vec<u8> = backend.sent_to(ZOOM).iter().map(|frame| frame[1]).collect();
    assert_eq!(programs.len(), 10);
    assert!(programs[..5].iter().all(|&p| p == programs[0]));
    assert!(programs[5..].iter().all(|&p| p == programs[5]));
    assert_ne!(programs[0], programs[5]);
}

/// A slow device does not hold up dispatches to another device.
#[tokio::test]
async fn test_devices_dispatch_independently() {
    let backend = rig().with_output("Looper");
    let midi = scanned(&backend).await;
    backend.set_port_send_delay(ZOOM, Duration::from_millis(200));

    let slow = midi.clone();
    let zoom = tokio::spawn(async move {
        slow.dispatcher()
            .dispatch("zoom_g3x", vec![pc(1), pc(2), pc(3)])
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    midi.dispatcher().send("looper", pc(9)).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(backend.sent_to("Looper"), vec![vec![0xC0, 9]]);

    zoom.await.unwrap().unwrap();
    assert_eq!(backend.sent_to(ZOOM).len(), 3);
}

// ---------------------------------------------------------------------------
// 3. Health and reconnect
// ---------------------------------------------------------------------------

/// A health check during a long batch leaves the busy device connected; the
/// batch completes and the device keeps accepting dispatches.
#[tokio::test]
async fn test_health_check_during_send_keeps_device_connected() {
    let backend = rig();
    let midi = MidiSystem::builder()
        .backend(backend.clone())
        .inter_frame_delay(Duration::ZERO)
        .operation_timeout(Duration::from_millis(200))
        .dispatch_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    midi.registry().scan().await.unwrap();
    backend.set_send_delay(Duration::from_millis(100));

    let toggles: Vec<_> = (0..6)
        .map(|block| MidiCommand::EffectToggle {
            block,
            enabled: false,
        })
        .collect();
    let sender = midi.clone();
    let batch = tokio::spawn(async move { sender.dispatcher().dispatch("zoom_g3x", toggles).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let changed = midi.registry().health_check().await.unwrap();
    assert!(changed.is_empty());
    assert!(midi.registry().status("zoom_g3x").unwrap().connected);

    batch.await.unwrap().unwrap();
    assert_eq!(backend.sent_to(ZOOM).len(), 6);

    backend.set_send_delay(Duration::ZERO);
    midi.dispatcher().send("zoom_g3x", pc(5)).await.unwrap();
    assert!(midi.registry().status("zoom_g3x").unwrap().connected);
}

/// A device that stops responding flips to disconnected but stays listed.
#[tokio::test]
async fn test_health_check_keeps_descriptor() {
    let backend = rig();
    let midi = scanned(&backend).await;

    assert!(midi.registry().health_check().await.unwrap().is_empty());

    backend.set_responsive(ZOOM, false);
    let changed = midi.registry().health_check().await.unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].name, "zoom_g3x");
    assert!(!changed[0].connected);

    let status = midi.registry().status("zoom_g3x").unwrap();
    assert!(!status.connected);
    assert_eq!(midi.registry().list().outputs.len(), 1);
}

/// Reconnect brings a recovered device back and is idempotent.
#[tokio::test]
async fn test_reconnect_recovers_and_is_idempotent() {
    let backend = rig();
    let midi = scanned(&backend).await;

    backend.set_responsive(ZOOM, false);
    midi.registry().health_check().await.unwrap();
    backend.set_responsive(ZOOM, true);

    let first = midi.registry().reconnect("zoom_g3x").await.unwrap();
    assert!(first.connected);
    let second = midi.registry().reconnect("zoom_g3x").await.unwrap();
    assert_eq!(first, second);

    midi.dispatcher().send("zoom_g3x", pc(9)).await.unwrap();
    assert_eq!(backend.sent_to(ZOOM), vec![vec![0xC0, 9]]);
}

/// A failed reconnect leaves this device as it was and other devices alone.
#[tokio::test]
async fn test_failed_reconnect_leaves_state_unchanged() {
    let backend = rig().with_output("Looper");
    let midi = scanned(&backend).await;

    backend.set_responsive(ZOOM, false);
    midi.registry().health_check().await.unwrap();
    let before = midi.registry().status("zoom_g3x").unwrap();

    backend.set_responsive(ZOOM, true);
    backend.refuse_connections(ZOOM, true);
    let result = midi.registry().reconnect("zoom_g3x").await;
    assert!(matches!(result, Err(Error::Connection { .. })));
    assert_eq!(midi.registry().status("zoom_g3x").unwrap(), before);
    assert!(midi.registry().status("looper").unwrap().connected);

    // Retryable
    backend.refuse_connections(ZOOM, false);
    assert!(midi.registry().reconnect("zoom_g3x").await.unwrap().connected);
}

/// Reconnecting a device whose port vanished is a connection error.
#[tokio::test]
async fn test_reconnect_missing_port() {
    let backend = rig();
    let midi = scanned(&backend).await;

    backend.unplug(ZOOM);
    let result = midi.registry().reconnect("zoom_g3x").await;
    assert!(matches!(result, Err(Error::Connection { .. })));
}

// ---------------------------------------------------------------------------
// 4. Monitor
// ---------------------------------------------------------------------------

/// Starting twice keeps one session; stopping makes the monitor inactive.
#[tokio::test]
async fn test_monitor_start_twice_then_stop() {
    let backend = rig();
    let midi = scanned(&backend).await;

    let first = midi.monitor().start("chocolate").await.unwrap();
    let second = midi.monitor().start("chocolate").await.unwrap();
    assert!(first.active && second.active);
    assert_eq!(first.started_at, second.started_at);
    assert_eq!(second.mode, MonitorMode::Real);
    assert_eq!(backend.listener_count(CHOCOLATE), 1);

    let stopped = midi.monitor().stop(Some("chocolate")).await;
    assert!(!stopped.active);
    assert_eq!(stopped.mode, MonitorMode::Disconnected);
    assert_eq!(backend.listener_count(CHOCOLATE), 0);
}

/// Inbound messages are captured and polled with a cursor.
#[tokio::test]
async fn test_monitor_captures_with_cursor() {
    let backend = rig();
    let midi = scanned(&backend).await;
    midi.monitor().start("chocolate").await.unwrap();

    backend.inject(CHOCOLATE, &[0xC0, 3]);
    let batch = midi.monitor().received(0);
    assert_eq!(batch.commands.len(), 1);
    assert_eq!(batch.commands[0].kind, ReceivedKind::ProgramChange);
    assert_eq!(batch.commands[0].program, Some(3));
    assert_eq!(batch.commands[0].device, "chocolate");

    backend.inject(CHOCOLATE, &[0xB0, 64, 127]);
    let next = midi.monitor().received(batch.cursor);
    assert_eq!(next.commands.len(), 1);
    assert_eq!(next.commands[0].kind, ReceivedKind::ControlChange);

    // Polling does not consume
    assert_eq!(midi.monitor().received(0).commands.len(), 2);
    assert_eq!(midi.registry().status("chocolate").unwrap().last_pc, Some(3));
}

/// Unknown and offline inputs cannot be monitored.
#[tokio::test]
async fn test_monitor_rejects_unknown_and_offline_inputs() {
    let backend = rig();
    let midi = scanned(&backend).await;

    assert!(matches!(
        midi.monitor().start("nope").await,
        Err(Error::DeviceNotFound(_))
    ));

    backend.unplug(CHOCOLATE);
    midi.registry().health_check().await.unwrap();
    assert!(matches!(
        midi.monitor().start("chocolate").await,
        Err(Error::DeviceDisconnected(_))
    ));
}

/// A session on an input that a scan no longer finds is closed, and a new
/// one can be opened once the input is back.
#[tokio::test]
async fn test_monitor_closes_session_when_input_removed() {
    let backend = rig();
    let midi = scanned(&backend).await;
    midi.monitor().start("chocolate").await.unwrap();
    assert_eq!(backend.listener_count(CHOCOLATE), 1);

    backend.unplug(CHOCOLATE);
    midi.registry().scan().await.unwrap();
    assert!(!midi.monitor().status(Some("chocolate")).active);
    assert!(!midi.monitor().is_active());
    assert_eq!(backend.listener_count(CHOCOLATE), 0);

    backend.plug(CHOCOLATE);
    midi.registry().scan().await.unwrap();
    midi.monitor().start("chocolate").await.unwrap();
    assert_eq!(backend.inject(CHOCOLATE, &[0xC0, 4]), 1);
    assert_eq!(midi.monitor().received(0).commands.len(), 1);
}

/// An input the health check marks offline loses its session; after a
/// reconnect the old connection is not reused.
#[tokio::test]
async fn test_monitor_closes_session_when_input_goes_offline() {
    let backend = rig();
    let midi = scanned(&backend).await;
    midi.monitor().start("chocolate").await.unwrap();

    backend.unplug(CHOCOLATE);
    midi.registry().health_check().await.unwrap();
    assert!(!midi.registry().status("chocolate").unwrap().connected);
    assert!(midi.monitor().status(None).devices.is_empty());
    assert_eq!(backend.listener_count(CHOCOLATE), 0);

    backend.plug(CHOCOLATE);
    midi.registry().reconnect("chocolate").await.unwrap();
    let status = midi.monitor().start("chocolate").await.unwrap();
    assert!(status.active);
    assert_eq!(backend.listener_count(CHOCOLATE), 1);

    // Reconnecting a healthy input keeps the running session.
    midi.registry().reconnect("chocolate").await.unwrap();
    assert!(midi.monitor().status(Some("chocolate")).active);
    assert_eq!(backend.listener_count(CHOCOLATE), 1);
}

/// The buffer keeps only the newest entries.
#[tokio::test]
async fn test_monitor_buffer_is_bounded() {
    let backend = rig();
    let midi = MidiSystem::builder()
        .backend(backend.clone())
        .monitor_capacity(3)
        .build()
        .unwrap();

    for program in 0..5u8 {
        midi.monitor().simulate(None, &[0xC0, program]).unwrap();
    }
    let batch = midi.monitor().received(0);
    let programs: Vec<_> = batch.commands.iter().filter_map(|c| c.program).collect();
    assert_eq!(programs, vec![2, 3, 4]);
    assert_eq!(midi.monitor().status(None).mode, MonitorMode::Simulated);

    assert_eq!(midi.monitor().clear(), 3);
    assert!(midi.monitor().received(batch.cursor).commands.is_empty());
}

/// Inbound Program Changes are forwarded when routing is enabled.
#[tokio::test]
async fn test_program_change_routing() {
    let backend = rig();
    let midi = MidiSystem::builder()
        .backend(backend.clone())
        .route_program_changes(true)
        .build()
        .unwrap();
    midi.registry().scan().await.unwrap();
    let mut program_changes = midi.take_program_changes().unwrap();

    midi.monitor().start("chocolate").await.unwrap();
    backend.inject(CHOCOLATE, &[0xC0, 7]);
    backend.inject(CHOCOLATE, &[0x90, 60, 100]);

    let event = program_changes.try_recv().unwrap();
    assert_eq!(event.device, "chocolate");
    assert_eq!(event.program, 7);
    assert!(program_changes.try_recv().is_err());
}
