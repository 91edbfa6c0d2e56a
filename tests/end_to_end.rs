//! End-to-end: store a patch, restart, activate it on a virtual Zoom.

use std::time::Duration;

use raspmidi::prelude::*;
use raspmidi::VirtualBackend;

const ZOOM: &str = "Zoom G3X";

fn clean() -> PatchFields {
    PatchFields {
        name: Some("Clean".to_string()),
        input_device: Some("chocolate".to_string()),
        output_device: Some("zoom_g3x".to_string()),
        input_channel: Some(1),
        command_type: Some("pc".to_string()),
        zoom_bank: Some("B".to_string()),
        zoom_patch: Some(15),
        ..PatchFields::default()
    }
}

async fn activate_from_disk(path: &std::path::Path, backend: &VirtualBackend) -> Result<DispatchReport> {
    let store = PatchStore::open(path)?;
    let patch = store
        .find_by_input_channel(1)
        .ok_or(raspmidi::store::Error::NotFound(1))?;

    let midi = MidiSystem::builder()
        .backend(backend.clone())
        .inter_frame_delay(Duration::ZERO)
        .build()?;
    midi.registry().scan().await?;
    Ok(midi.dispatcher().activate(&patch).await?)
}

/// Scenario "Clean" across a restart.
#[tokio::test]
async fn test_clean_scenario_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patches.json");

    {
        let store = PatchStore::open(&path).unwrap();
        let patch = store.create(&clean()).unwrap();
        assert_eq!(patch.routing.zoom_patch, Some(15));
        assert_eq!(bank::decode(15).unwrap(), ('B', 5));
    }

    let backend = VirtualBackend::new().with_output(ZOOM);
    let report = activate_from_disk(&path, &backend).await.unwrap();
    assert_eq!(report.frames, vec!["C0 0F"]);
    assert_eq!(backend.sent_to(ZOOM), vec![vec![0xC0, 0x0F]]);
}

/// Subsystem errors surface through the umbrella error.
#[tokio::test]
async fn test_missing_output_surfaces_as_midi_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patches.json");
    PatchStore::open(&path).unwrap().create(&clean()).unwrap();

    let backend = VirtualBackend::new();
    let err = activate_from_disk(&path, &backend).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Midi(raspmidi::midi::Error::DeviceNotFound(_))
    ));
    assert!(backend.sent().is_empty());
}
