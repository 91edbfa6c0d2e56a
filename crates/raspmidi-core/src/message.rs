//! MIDI commands and their wire encoding.
//!
//! Encoding is strict: a field outside its protocol range fails the whole
//! command with [`Error::Encoding`] instead of being clamped or masked, so a
//! malformed request never produces bytes.

use std::fmt;

use smallvec::SmallVec;

use crate::error::{Error, Result};

pub const ZOOM_MANUFACTURER_ID: u8 = 0x52;
const ZOOM_DEVICE_ID: u8 = 0x00;

/// Patch select on the G3X: `F0 52 00 5A 09 00 00 <patch> F7`.
const PATCH_SELECT_HEADER: [u8; 4] = [0x5A, 0x09, 0x00, 0x00];
/// Editor-mode parameter messages: `F0 52 00 6E 64 ...`.
const EDITOR_HEADER: [u8; 2] = [0x6E, 0x64];
const EDITOR_TUNER: u8 = 0x0B;
const EDITOR_EFFECT_TOGGLE: u8 = 0x03;

/// Bank Select LSB controller (CC 32).
const BANK_SELECT_LSB_CC: u8 = 0x20;

/// Number of effect blocks addressable by effect toggles.
pub const EFFECT_BLOCKS: u8 = 6;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

/// Inline capacity covers every channel message and Zoom SysEx frame.
pub type FrameBytes = SmallVec<[u8; 12]>;

/// One complete MIDI message as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiFrame {
    bytes: FrameBytes,
}

impl MidiFrame {
    fn channel_message(status: u8, channel: u8, data: &[u8]) -> Self {
        let mut bytes = FrameBytes::new();
        bytes.push(status | channel);
        bytes.extend_from_slice(data);
        Self { bytes }
    }

    fn sysex(body: impl IntoIterator<Item = u8>) -> Self {
        let mut bytes = FrameBytes::new();
        bytes.push(SYSEX_START);
        bytes.extend(body);
        bytes.push(SYSEX_END);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_sysex(&self) -> bool {
        self.bytes.first() == Some(&SYSEX_START)
    }

    /// `(channel, program)` if this frame is a Program Change.
    pub fn program_change(&self) -> Option<(u8, u8)> {
        match self.bytes.as_slice() {
            [status, program] if status & 0xF0 == 0xC0 => Some((status & 0x0F, *program)),
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for MidiFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A command addressed to an output device, before range checking.
///
/// Numeric fields are wide on purpose: they come straight from request
/// bodies and are narrowed by [`MidiCommand::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiCommand {
    ProgramChange {
        channel: i64,
        program: i64,
    },
    ControlChange {
        channel: i64,
        controller: i64,
        value: i64,
    },
    NoteOn {
        channel: i64,
        note: i64,
        velocity: i64,
    },
    NoteOff {
        channel: i64,
        note: i64,
        velocity: i64,
    },
    /// Bank Select LSB followed by Program Change.
    BankProgram {
        channel: i64,
        bank: i64,
        program: i64,
    },
    /// Zoom patch select by global address.
    PatchSelect { patch: i64 },
    EffectToggle { block: i64, enabled: bool },
    Tuner,
    /// Arbitrary SysEx body, framed with `F0`/`F7` on encode.
    SysEx { payload: Vec<i64> },
}

fn narrow(field: &'static str, value: i64, min: i64, max: i64) -> Result<u8> {
    if (min..=max).contains(&value) {
        Ok(value as u8)
    } else {
        Err(Error::Encoding {
            field,
            value,
            min,
            max,
        })
    }
}

fn channel(value: i64) -> Result<u8> {
    narrow("channel", value, 0, 15)
}

fn data(field: &'static str, value: i64) -> Result<u8> {
    narrow(field, value, 0, 127)
}

impl MidiCommand {
    pub fn encode(&self) -> Result<Vec<MidiFrame>> {
        let frames = match self {
            MidiCommand::ProgramChange { channel: ch, program } => {
                vec![MidiFrame::channel_message(
                    0xC0,
                    channel(*ch)?,
                    &[data("program", *program)?],
                )]
            }
            MidiCommand::ControlChange {
                channel: ch,
                controller,
                value,
            } => vec![MidiFrame::channel_message(
                0xB0,
                channel(*ch)?,
                &[data("cc", *controller)?, data("value", *value)?],
            )],
            MidiCommand::NoteOn {
                channel: ch,
                note,
                velocity,
            } => vec![MidiFrame::channel_message(
                0x90,
                channel(*ch)?,
                &[data("note", *note)?, data("velocity", *velocity)?],
            )],
            MidiCommand::NoteOff {
                channel: ch,
                note,
                velocity,
            } => vec![MidiFrame::channel_message(
                0x80,
                channel(*ch)?,
                &[data("note", *note)?, data("velocity", *velocity)?],
            )],
            MidiCommand::BankProgram {
                channel: ch,
                bank,
                program,
            } => {
                let ch = channel(*ch)?;
                let bank = data("bank", *bank)?;
                let program = data("program", *program)?;
                vec![
                    MidiFrame::channel_message(0xB0, ch, &[BANK_SELECT_LSB_CC, bank]),
                    MidiFrame::channel_message(0xC0, ch, &[program]),
                ]
            }
            MidiCommand::PatchSelect { patch } => {
                let patch = narrow("patch", *patch, 0, crate::bank::MAX_GLOBAL_ADDRESS as i64)?;
                vec![MidiFrame::sysex(
                    [ZOOM_MANUFACTURER_ID, ZOOM_DEVICE_ID]
                        .into_iter()
                        .chain(PATCH_SELECT_HEADER)
                        .chain([patch]),
                )]
            }
            MidiCommand::EffectToggle { block, enabled } => {
                let block = narrow("block", *block, 0, EFFECT_BLOCKS as i64 - 1)?;
                vec![MidiFrame::sysex(
                    [ZOOM_MANUFACTURER_ID, ZOOM_DEVICE_ID]
                        .into_iter()
                        .chain(EDITOR_HEADER)
                        .chain([EDITOR_EFFECT_TOGGLE, 0x00, block, 0x00, 0x00, *enabled as u8]),
                )]
            }
            MidiCommand::Tuner => vec![MidiFrame::sysex(
                [ZOOM_MANUFACTURER_ID, ZOOM_DEVICE_ID]
                    .into_iter()
                    .chain(EDITOR_HEADER)
                    .chain([EDITOR_TUNER]),
            )],
            MidiCommand::SysEx { payload } => {
                if payload.is_empty() {
                    return Err(Error::Validation("SysEx payload is empty".to_string()));
                }
                let body = payload
                    .iter()
                    .map(|b| data("sysex", *b))
                    .collect::<Result<Vec<u8>>>()?;
                vec![MidiFrame::sysex(body)]
            }
        };
        Ok(frames)
    }
}

impl fmt::Display for MidiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiCommand::ProgramChange { channel, program } => {
                write!(f, "PC ch={channel} program={program}")
            }
            MidiCommand::ControlChange {
                channel,
                controller,
                value,
            } => write!(f, "CC ch={channel} cc={controller} value={value}"),
            MidiCommand::NoteOn {
                channel,
                note,
                velocity,
            } => write!(f, "Note On ch={channel} note={note} velocity={velocity}"),
            MidiCommand::NoteOff {
                channel,
                note,
                velocity,
            } => write!(f, "Note Off ch={channel} note={note} velocity={velocity}"),
            MidiCommand::BankProgram {
                channel,
                bank,
                program,
            } => write!(f, "Bank/PC ch={channel} bank={bank} program={program}"),
            MidiCommand::PatchSelect { patch } => write!(f, "SysEx patch select {patch}"),
            MidiCommand::EffectToggle { block, enabled } => {
                let state = if *enabled { "on" } else { "off" };
                write!(f, "SysEx effect block {block} {state}")
            }
            MidiCommand::Tuner => f.write_str("SysEx tuner"),
            MidiCommand::SysEx { payload } => write!(f, "SysEx ({} bytes)", payload.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(command: MidiCommand) -> Vec<u8> {
        let frames = command.encode().unwrap();
        assert_eq!(frames.len(), 1);
        frames[0].as_bytes().to_vec()
    }

    #[test]
    fn test_program_change_is_two_bytes() {
        let bytes = single(MidiCommand::ProgramChange {
            channel: 0,
            program: 15,
        });
        assert_eq!(bytes, vec![0xC0, 15]);

        let bytes = single(MidiCommand::ProgramChange {
            channel: 9,
            program: 127,
        });
        assert_eq!(bytes, vec![0xC9, 127]);
    }

    #[test]
    fn test_channel_messages_are_three_bytes() {
        let cc = single(MidiCommand::ControlChange {
            channel: 15,
            controller: 64,
            value: 0,
        });
        assert_eq!(cc, vec![0xBF, 64, 0]);

        let on = single(MidiCommand::NoteOn {
            channel: 0,
            note: 60,
            velocity: 100,
        });
        assert_eq!(on, vec![0x90, 60, 100]);

        let off = single(MidiCommand::NoteOff {
            channel: 3,
            note: 64,
            velocity: 0,
        });
        assert_eq!(off, vec![0x83, 64, 0]);
    }

    #[test]
    fn test_bank_program_emits_bank_select_then_pc() {
        let frames = MidiCommand::BankProgram {
            channel: 0,
            bank: 1,
            program: 5,
        }
        .encode()
        .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_bytes(), &[0xB0, 0x20, 1]);
        assert_eq!(frames[1].as_bytes(), &[0xC0, 5]);
    }

    #[test]
    fn test_zoom_sysex_frames() {
        assert_eq!(
            single(MidiCommand::PatchSelect { patch: 15 }),
            vec![0xF0, 0x52, 0x00, 0x5A, 0x09, 0x00, 0x00, 0x0F, 0xF7]
        );
        assert_eq!(
            single(MidiCommand::Tuner),
            vec![0xF0, 0x52, 0x00, 0x6E, 0x64, 0x0B, 0xF7]
        );
        assert_eq!(
            single(MidiCommand::EffectToggle {
                block: 2,
                enabled: false
            }),
            vec![0xF0, 0x52, 0x00, 0x6E, 0x64, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00, 0xF7]
        );
    }

    #[test]
    fn test_raw_sysex_is_framed() {
        let frames = MidiCommand::SysEx {
            payload: vec![0x7E, 0x7F, 0x06, 0x01],
        }
        .encode()
        .unwrap();
        assert!(frames[0].is_sysex());
        assert_eq!(frames[0].as_bytes(), &[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]);
    }

    #[test]
    fn test_out_of_range_fields_fail_without_frames() {
        let cases = vec![
            MidiCommand::ProgramChange {
                channel: 16,
                program: 0,
            },
            MidiCommand::ProgramChange {
                channel: 0,
                program: 128,
            },
            MidiCommand::ControlChange {
                channel: 0,
                controller: -1,
                value: 0,
            },
            MidiCommand::NoteOn {
                channel: 0,
                note: 60,
                velocity: 200,
            },
            MidiCommand::PatchSelect { patch: 100 },
            MidiCommand::EffectToggle {
                block: 6,
                enabled: true,
            },
            MidiCommand::SysEx {
                payload: vec![0x01, 0xF7],
            },
        ];
        for command in cases {
            assert!(
                matches!(command.encode(), Err(Error::Encoding { .. })),
                "{command} should fail to encode"
            );
        }
    }

    #[test]
    fn test_empty_sysex_rejected() {
        let result = MidiCommand::SysEx { payload: vec![] }.encode();
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_frame_helpers() {
        let frames = MidiCommand::ProgramChange {
            channel: 2,
            program: 42,
        }
        .encode()
        .unwrap();
        assert_eq!(frames[0].program_change(), Some((2, 42)));
        assert_eq!(frames[0].to_hex(), "C2 2A");

        let cc = MidiCommand::ControlChange {
            channel: 0,
            controller: 7,
            value: 100,
        }
        .encode()
        .unwrap();
        assert_eq!(cc[0].program_change(), None);
    }
}
