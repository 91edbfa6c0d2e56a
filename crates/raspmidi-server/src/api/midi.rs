//! `/api/midi` handlers: devices, ad-hoc commands, Zoom SysEx, monitor.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use raspmidi_core::bank;
use raspmidi_core::patch::lenient_int;
use raspmidi_midi_io::MidiCommand;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::response::{self, ApiResult};
use crate::config::MidiSelection;
use crate::error::ApiError;
use crate::state::AppState;
use crate::tasks;

const DEFAULT_NOTE_VELOCITY: i64 = 64;

fn output_device(state: &AppState, requested: Option<String>) -> Result<String, ApiError> {
    requested
        .filter(|d| !d.trim().is_empty())
        .or_else(|| state.selection().output_device.clone())
        .ok_or_else(|| ApiError::bad_request("device is required"))
}

fn required(value: Option<i64>, field: &str) -> Result<i64, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(format!("{field} is required")))
}

async fn send(state: &AppState, device: String, command: MidiCommand) -> ApiResult {
    let summary = command.to_string();
    let report = state.midi.dispatcher().send(&device, command).await?;
    let message = format!("{summary} sent to {}", report.device);
    response::data_with_message(report, message)
}

// ==================== Devices ====================

pub async fn devices_list(State(state): State<AppState>) -> ApiResult {
    response::data(state.midi.registry().list())
}

pub async fn devices_scan(State(state): State<AppState>) -> ApiResult {
    state.midi.registry().scan().await?;
    tasks::watch_controller(&state).await;
    response::data(state.midi.registry().list())
}

pub async fn device_status(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> ApiResult {
    let name = response::path(name)?;
    response::data(state.midi.registry().status(&name)?)
}

pub async fn device_reconnect(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> ApiResult {
    let name = response::path(name)?;
    let descriptor = state.midi.registry().reconnect(&name).await?;
    tasks::watch_controller(&state).await;
    let message = format!("{} reconnected", descriptor.name);
    response::data_with_message(descriptor, message)
}

pub async fn devices_status_detailed(State(state): State<AppState>) -> ApiResult {
    let list = state.midi.registry().list();
    response::data(json!({
        "inputs": list.inputs,
        "outputs": list.outputs,
        "monitor": state.midi.monitor().status(None),
        "backend": state.midi.backend_name(),
    }))
}

/// Probes every device now instead of waiting for the periodic check.
pub async fn devices_power_status(State(state): State<AppState>) -> ApiResult {
    let changed = state.midi.registry().health_check().await?;
    let list = state.midi.registry().list();
    response::data_with_message(
        json!({
            "inputs": list.inputs,
            "outputs": list.outputs,
            "changed": changed,
        }),
        "Device power status checked",
    )
}

// ==================== Selection ====================

fn controller_listening(state: &AppState) -> Value {
    let listening = state
        .controller_input()
        .is_some_and(|input| state.midi.monitor().status(Some(input.as_str())).active);
    Value::Bool(listening)
}

pub async fn config_get(State(state): State<AppState>) -> ApiResult {
    response::envelope(
        state.selection().as_ref(),
        [("listening", controller_listening(&state))],
    )
}

/// Present fields replace the saved value; an empty device name clears it.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MidiConfigBody {
    input_device: Option<String>,
    output_device: Option<String>,
    auto_connect: Option<bool>,
}

fn device_choice(name: String) -> Option<String> {
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

pub async fn config_update(
    State(state): State<AppState>,
    payload: Result<Json<MidiConfigBody>, JsonRejection>,
) -> ApiResult {
    let body = response::body(payload)?;
    let watched = state.controller_input();

    let mut next = MidiSelection::clone(&state.selection());
    if let Some(input) = body.input_device {
        next.input_device = device_choice(input);
    }
    if let Some(output) = body.output_device {
        next.output_device = device_choice(output);
    }
    if let Some(auto_connect) = body.auto_connect {
        next.auto_connect = auto_connect;
    }
    let selection = state.set_selection(next)?;

    if let Some(old) = watched.filter(|old| state.controller_input().as_deref() != Some(old.as_str())) {
        state.midi.monitor().stop(Some(old.as_str())).await;
    }
    tasks::watch_controller(&state).await;
    info!(
        input = ?selection.input_device,
        output = ?selection.output_device,
        auto_connect = selection.auto_connect,
        "MIDI selection updated"
    );

    response::envelope(
        selection.as_ref(),
        [
            ("message", Value::from("MIDI configuration updated")),
            ("listening", controller_listening(&state)),
        ],
    )
}

// ==================== Ad-hoc commands ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProgramChangeBody {
    device: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    channel: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    program: Option<i64>,
    /// Sends Bank Select before the Program Change.
    #[serde(deserialize_with = "lenient_int")]
    bank: Option<i64>,
}

pub async fn program_change(
    State(state): State<AppState>,
    payload: Result<Json<ProgramChangeBody>, JsonRejection>,
) -> ApiResult {
    let body = response::body(payload)?;
    let device = output_device(&state, body.device)?;
    let channel = body.channel.unwrap_or(0);
    let program = required(body.program, "program")?;
    let command = match body.bank {
        Some(bank) => MidiCommand::BankProgram {
            channel,
            bank,
            program,
        },
        None => MidiCommand::ProgramChange { channel, program },
    };
    send(&state, device, command).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ControlChangeBody {
    device: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    channel: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    cc: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    value: Option<i64>,
}

pub async fn control_change(
    State(state): State<AppState>,
    payload: Result<Json<ControlChangeBody>, JsonRejection>,
) -> ApiResult {
    let body = response::body(payload)?;
    let device = output_device(&state, body.device)?;
    let command = MidiCommand::ControlChange {
        channel: body.channel.unwrap_or(0),
        controller: required(body.cc, "cc")?,
        value: required(body.value, "value")?,
    };
    send(&state, device, command).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NoteBody {
    device: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    channel: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    note: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    velocity: Option<i64>,
    /// `on` (default) or `off`.
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub async fn note(
    State(state): State<AppState>,
    payload: Result<Json<NoteBody>, JsonRejection>,
) -> ApiResult {
    let body = response::body(payload)?;
    let device = output_device(&state, body.device)?;
    let channel = body.channel.unwrap_or(0);
    let note = required(body.note, "note")?;
    let command = match body.kind.as_deref().unwrap_or("on") {
        "on" | "note_on" => MidiCommand::NoteOn {
            channel,
            note,
            velocity: body.velocity.unwrap_or(DEFAULT_NOTE_VELOCITY),
        },
        "off" | "note_off" => MidiCommand::NoteOff {
            channel,
            note,
            velocity: body.velocity.unwrap_or(0),
        },
        other => {
            return Err(ApiError::bad_request(format!(
                "type must be \"on\" or \"off\", got \"{other}\""
            )))
        }
    };
    send(&state, device, command).await
}

/// Any command by `type`; the only route for raw SysEx.
pub async fn send_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandBody>, JsonRejection>,
) -> ApiResult {
    let body = response::body(payload)?;
    if body.kind.is_none() {
        return Err(ApiError::bad_request("type is required"));
    }
    let command = command_from(&body)?;
    let device = output_device(&state, body.device)?;
    send(&state, device, command).await
}

// ==================== Zoom SysEx ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeviceBody {
    device: Option<String>,
}

pub async fn sysex_tuner(
    State(state): State<AppState>,
    payload: Result<Json<DeviceBody>, JsonRejection>,
) -> ApiResult {
    let body = response::optional_body(payload)?;
    let device = output_device(&state, body.device)?;
    send(&state, device, MidiCommand::Tuner).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SysexPatchBody {
    device: Option<String>,
    /// Global address 0-99.
    #[serde(deserialize_with = "lenient_int")]
    patch_number: Option<i64>,
    zoom_bank: Option<String>,
    /// Local slot 0-9, used with `zoom_bank`.
    #[serde(deserialize_with = "lenient_int")]
    zoom_slot: Option<i64>,
}

pub async fn sysex_patch(
    State(state): State<AppState>,
    payload: Result<Json<SysexPatchBody>, JsonRejection>,
) -> ApiResult {
    let body = response::body(payload)?;
    let device = output_device(&state, body.device)?;
    let patch = match (body.patch_number, body.zoom_bank.as_deref(), body.zoom_slot) {
        (Some(global), _, _) => global,
        (None, Some(letter), Some(slot)) => bank::encode(bank::parse_bank(letter)?, slot)? as i64,
        _ => {
            return Err(ApiError::bad_request(
                "patch_number or zoom_bank and zoom_slot are required",
            ))
        }
    };
    send(&state, device, MidiCommand::PatchSelect { patch }).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SysexEffectBody {
    device: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    block: Option<i64>,
    /// 0 = off, 1 = on.
    #[serde(deserialize_with = "lenient_int")]
    state: Option<i64>,
}

pub async fn sysex_effect(
    State(state): State<AppState>,
    payload: Result<Json<SysexEffectBody>, JsonRejection>,
) -> ApiResult {
    let body = response::body(payload)?;
    let device = output_device(&state, body.device)?;
    let enabled = match required(body.state, "state")? {
        0 => false,
        1 => true,
        other => {
            return Err(ApiError::bad_request(format!(
                "state must be 0 or 1, got {other}"
            )))
        }
    };
    let command = MidiCommand::EffectToggle {
        block: required(body.block, "block")?,
        enabled,
    };
    send(&state, device, command).await
}

pub async fn zoom_bank_patches(bank_letter: Result<Path<String>, PathRejection>) -> ApiResult {
    let letter = bank::parse_bank(&response::path(bank_letter)?)?;
    response::data(json!({
        "bank": letter,
        "patches": bank::bank_addresses(letter)?,
    }))
}

// ==================== Monitor ====================

pub async fn monitor_start(
    State(state): State<AppState>,
    payload: Result<Json<DeviceBody>, JsonRejection>,
) -> ApiResult {
    let body = response::optional_body(payload)?;
    let device = body
        .device
        .filter(|d| !d.trim().is_empty())
        .or_else(|| state.selection().input_device.clone())
        .ok_or_else(|| ApiError::bad_request("device is required"))?;
    let status = state.midi.monitor().start(&device).await?;
    response::data_with_message(status, format!("MIDI monitor started on {device}"))
}

pub async fn monitor_stop(
    State(state): State<AppState>,
    payload: Result<Json<DeviceBody>, JsonRejection>,
) -> ApiResult {
    let body = response::optional_body(payload)?;
    let status = state.midi.monitor().stop(body.device.as_deref()).await;
    response::data_with_message(status, "MIDI monitor stopped")
}

#[derive(Debug, Default, Deserialize)]
pub struct MonitorStatusParams {
    device: Option<String>,
}

pub async fn monitor_status(
    State(state): State<AppState>,
    params: Result<Query<MonitorStatusParams>, QueryRejection>,
) -> ApiResult {
    let params = response::query(params)?;
    response::data(state.midi.monitor().status(params.device.as_deref()))
}

#[derive(Debug, Default, Deserialize)]
pub struct CursorParams {
    #[serde(default)]
    since: u64,
}

pub async fn commands_received(
    State(state): State<AppState>,
    params: Result<Query<CursorParams>, QueryRejection>,
) -> ApiResult {
    let params = response::query(params)?;
    let batch = state.midi.monitor().received(params.since);
    response::envelope(batch.commands, [("cursor", Value::from(batch.cursor))])
}

pub async fn commands_clear(State(state): State<AppState>) -> ApiResult {
    let cleared = state.midi.monitor().clear();
    response::data_with_message(json!({ "cleared": cleared }), "Received MIDI commands cleared")
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommandBody {
    device: Option<String>,
    /// Raw message for simulate; takes precedence over the typed fields.
    bytes: Option<Vec<i64>>,
    /// `pc`, `cc`, `note_on`, `note_off` or `sysex`.
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    channel: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    program: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    bank: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    cc: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    value: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    note: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    velocity: Option<i64>,
    /// SysEx data bytes without the F0/F7 framing.
    payload: Option<Vec<i64>>,
}

fn command_from(body: &CommandBody) -> Result<MidiCommand, ApiError> {
    let channel = body.channel.unwrap_or(0);
    let command = match body.kind.as_deref() {
        Some("pc" | "program_change") => {
            let program = required(body.program, "program")?;
            match body.bank {
                Some(bank) => MidiCommand::BankProgram {
                    channel,
                    bank,
                    program,
                },
                None => MidiCommand::ProgramChange { channel, program },
            }
        }
        Some("cc" | "control_change") => MidiCommand::ControlChange {
            channel,
            controller: required(body.cc, "cc")?,
            value: required(body.value, "value")?,
        },
        Some("note_on") => MidiCommand::NoteOn {
            channel,
            note: required(body.note, "note")?,
            velocity: body.velocity.unwrap_or(DEFAULT_NOTE_VELOCITY),
        },
        Some("note_off") => MidiCommand::NoteOff {
            channel,
            note: required(body.note, "note")?,
            velocity: body.velocity.unwrap_or(0),
        },
        Some("sysex") => MidiCommand::SysEx {
            payload: body
                .payload
                .clone()
                .ok_or_else(|| ApiError::bad_request("payload is required"))?,
        },
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "Unknown command type '{other}'"
            )))
        }
        None => return Err(ApiError::bad_request("type or bytes is required")),
    };
    Ok(command)
}

fn simulated_bytes(body: &CommandBody) -> Result<Vec<u8>, ApiError> {
    if let Some(bytes) = &body.bytes {
        return bytes
            .iter()
            .map(|b| {
                u8::try_from(*b).map_err(|_| ApiError::bad_request(format!("byte {b} is out of range")))
            })
            .collect();
    }

    let frames = command_from(body)?.encode()?;
    Ok(frames
        .iter()
        .flat_map(|frame| frame.as_bytes().iter().copied())
        .collect())
}

pub async fn commands_simulate(
    State(state): State<AppState>,
    payload: Result<Json<CommandBody>, JsonRejection>,
) -> ApiResult {
    let body = response::body(payload)?;
    let bytes = simulated_bytes(&body)?;
    let command = state.midi.monitor().simulate(body.device.as_deref(), &bytes)?;
    response::data_with_message(command, "MIDI command simulated")
}

pub async fn commands_log(
    State(state): State<AppState>,
    params: Result<Query<CursorParams>, QueryRejection>,
) -> ApiResult {
    let params = response::query(params)?;
    let log = state.midi.command_log();
    response::envelope(log.entries(params.since), [("dropped", Value::from(log.dropped()))])
}
