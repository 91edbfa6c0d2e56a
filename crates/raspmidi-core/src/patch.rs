//! Patches: stored rules that turn a trigger on an input device into a
//! command on an output device.
//!
//! [`PatchFields`] is the loosely-typed request body. [`PatchFields::validate`]
//! narrows it into [`Routing`], which is what a [`Patch`] stores next to its
//! identity and timestamps.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::bank::{self, BankSlot};
use crate::error::{Error, Result};
use crate::message::{MidiCommand, EFFECT_BLOCKS};

pub const DEFAULT_NOTE_ON_VELOCITY: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Pc,
    Cc,
    NoteOn,
    NoteOff,
    EffectsConfig,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Pc => "pc",
            CommandType::Cc => "cc",
            CommandType::NoteOn => "note_on",
            CommandType::NoteOff => "note_off",
            CommandType::EffectsConfig => "effects_config",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pc" => Ok(CommandType::Pc),
            "cc" => Ok(CommandType::Cc),
            "note_on" => Ok(CommandType::NoteOn),
            "note_off" => Ok(CommandType::NoteOff),
            "effects_config" => Ok(CommandType::EffectsConfig),
            other => Err(Error::Validation(format!("Unknown command type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectState {
    pub enabled: bool,
}

/// Effect slot key (`effect_1`..`effect_6`) to state.
pub type EffectMap = BTreeMap<String, EffectState>;

/// Key for a zero-based effect block.
pub fn effect_key(block: u8) -> String {
    format!("effect_{}", block + 1)
}

/// Zero-based effect block for a key such as `effect_3`.
pub fn effect_block(key: &str) -> Option<u8> {
    key.strip_prefix("effect_")?
        .parse::<u8>()
        .ok()
        .filter(|n| (1..=EFFECT_BLOCKS).contains(n))
        .map(|n| n - 1)
}

/// Accepts a JSON number, a numeric string, an empty string or null.
///
/// HTML forms post blank inputs as `""`.
pub fn lenient_int<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match Option::<IntOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrString::Int(v)) => Ok(Some(v)),
        Some(IntOrString::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(IntOrString::Str(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected an integer, got '{s}'"))),
    }
}

/// Create/update request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchFields {
    pub name: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    pub input_channel: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub output_channel: Option<i64>,
    pub command_type: Option<String>,
    pub zoom_bank: Option<String>,
    /// Global address (0-99).
    #[serde(deserialize_with = "lenient_int")]
    pub zoom_patch: Option<i64>,
    /// Local slot (0-9) within `zoom_bank`; alternative to `zoom_patch`.
    #[serde(deserialize_with = "lenient_int")]
    pub zoom_slot: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub program: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub cc: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub value: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub note: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub velocity: Option<i64>,
    pub effects: Option<EffectMap>,
}

fn required_text(field: &str, value: &Option<String>) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(Error::Validation(format!("{field} is required"))),
    }
}

fn optional_range(field: &str, value: Option<i64>, max: u8) -> Result<Option<u8>> {
    match value {
        None => Ok(None),
        Some(v) if (0..=max as i64).contains(&v) => Ok(Some(v as u8)),
        Some(v) => Err(Error::Validation(format!(
            "{field} must be between 0 and {max}, got {v}"
        ))),
    }
}

fn require<T>(field: &str, command_type: CommandType, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| {
        Error::Validation(format!("{field} is required for {command_type} patches"))
    })
}

impl PatchFields {
    /// Checks presence and ranges, resolves the zoom address through the
    /// bank codec, and returns the canonical routing.
    pub fn validate(&self) -> Result<Routing> {
        let name = required_text("name", &self.name)?;
        let input_device = required_text("input_device", &self.input_device)?;
        let output_device = required_text("output_device", &self.output_device)?;
        let command_type: CommandType = required_text("command_type", &self.command_type)?.parse()?;

        let input_channel = optional_range("input_channel", self.input_channel, 127)?;
        let output_channel = optional_range("output_channel", self.output_channel, 15)?.unwrap_or(0);
        let program = optional_range("program", self.program, 127)?;
        let cc = optional_range("cc", self.cc, 127)?;
        let value = optional_range("value", self.value, 127)?;
        let note = optional_range("note", self.note, 127)?;
        let velocity = optional_range("velocity", self.velocity, 127)?;

        let slot = self.zoom_address()?;

        match command_type {
            CommandType::Pc => {
                if program.is_none() && slot.is_none() {
                    return Err(Error::Validation(
                        "pc patches need a program or a zoom bank and patch".to_string(),
                    ));
                }
            }
            CommandType::Cc => {
                require("cc", command_type, cc)?;
                require("value", command_type, value)?;
            }
            CommandType::NoteOn | CommandType::NoteOff => {
                require("note", command_type, note)?;
            }
            CommandType::EffectsConfig => {}
        }

        let effects = if command_type == CommandType::EffectsConfig {
            let effects = match &self.effects {
                Some(map) if !map.is_empty() => map,
                _ => {
                    return Err(Error::Validation(
                        "effects_config patches need at least one effect".to_string(),
                    ))
                }
            };
            if let Some(bad) = effects.keys().find(|k| effect_block(k).is_none()) {
                return Err(Error::Validation(format!(
                    "Unknown effect slot '{bad}': expected effect_1 to effect_{EFFECT_BLOCKS}"
                )));
            }
            Some(effects.clone())
        } else {
            None
        };

        let (zoom_bank, zoom_patch) = match slot {
            Some(slot) => (Some(slot.bank), Some(slot.global()?)),
            None => (None, None),
        };

        Ok(Routing {
            name,
            input_device,
            output_device,
            input_channel,
            output_channel,
            command_type,
            zoom_bank,
            zoom_patch,
            program,
            cc,
            value,
            note,
            velocity,
            effects,
        })
    }

    fn zoom_address(&self) -> Result<Option<BankSlot>> {
        let bank = match self.zoom_bank.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(bank::parse_bank(text)?),
            _ => None,
        };

        let from_slot = match (bank, self.zoom_slot) {
            (Some(bank), Some(slot)) => Some(BankSlot::new(bank, slot)?),
            (None, Some(_)) => {
                return Err(Error::Validation(
                    "zoom_slot needs a zoom_bank".to_string(),
                ))
            }
            (_, None) => None,
        };

        let from_global = self.zoom_patch.map(BankSlot::from_global).transpose()?;

        match (bank, from_slot, from_global) {
            (_, Some(a), Some(b)) if a != b => Err(Error::Validation(format!(
                "zoom_patch {} is {b}, but zoom_bank/zoom_slot say {a}",
                self.zoom_patch.unwrap_or_default()
            ))),
            (Some(bank), None, Some(slot)) if slot.bank != bank => Err(Error::Validation(format!(
                "zoom_patch {} belongs to bank {}, not {bank}",
                self.zoom_patch.unwrap_or_default(),
                slot.bank
            ))),
            (Some(_), None, None) => Err(Error::Validation(
                "zoom_bank needs a zoom_patch or zoom_slot".to_string(),
            )),
            (_, slot, global) => Ok(slot.or(global)),
        }
    }
}

/// Validated routing fields of a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    pub name: String,
    pub input_device: String,
    pub output_device: String,
    pub input_channel: Option<u8>,
    #[serde(default)]
    pub output_channel: u8,
    pub command_type: CommandType,
    pub zoom_bank: Option<char>,
    pub zoom_patch: Option<u8>,
    pub program: Option<u8>,
    pub cc: Option<u8>,
    pub value: Option<u8>,
    pub note: Option<u8>,
    pub velocity: Option<u8>,
    pub effects: Option<EffectMap>,
}

impl Routing {
    pub fn bank_slot(&self) -> Option<BankSlot> {
        self.zoom_patch
            .and_then(|global| BankSlot::from_global(global as i64).ok())
    }

    /// Commands sent to the output device when this patch is activated.
    ///
    /// A zoom address takes precedence over `program` for `pc` patches.
    /// Effects-config patches select the patch first (when addressed) and
    /// then switch off every effect block stored as disabled; blocks are
    /// assumed on after a patch change.
    pub fn commands(&self) -> Result<Vec<MidiCommand>> {
        let channel = self.output_channel as i64;
        let missing = |field: &str| {
            Error::Validation(format!(
                "{field} is required for {} patches",
                self.command_type
            ))
        };

        let commands = match self.command_type {
            CommandType::Pc => {
                let program = self
                    .zoom_patch
                    .or(self.program)
                    .ok_or_else(|| missing("program"))?;
                vec![MidiCommand::ProgramChange {
                    channel,
                    program: program as i64,
                }]
            }
            CommandType::Cc => vec![MidiCommand::ControlChange {
                channel,
                controller: self.cc.ok_or_else(|| missing("cc"))? as i64,
                value: self.value.ok_or_else(|| missing("value"))? as i64,
            }],
            CommandType::NoteOn => vec![MidiCommand::NoteOn {
                channel,
                note: self.note.ok_or_else(|| missing("note"))? as i64,
                velocity: self.velocity.unwrap_or(DEFAULT_NOTE_ON_VELOCITY) as i64,
            }],
            CommandType::NoteOff => vec![MidiCommand::NoteOff {
                channel,
                note: self.note.ok_or_else(|| missing("note"))? as i64,
                velocity: self.velocity.unwrap_or(0) as i64,
            }],
            CommandType::EffectsConfig => {
                let mut commands = Vec::new();
                if let Some(global) = self.zoom_patch {
                    commands.push(MidiCommand::ProgramChange {
                        channel,
                        program: global as i64,
                    });
                }
                let effects = self.effects.as_ref().ok_or_else(|| missing("effects"))?;
                for block in 0..EFFECT_BLOCKS {
                    let disabled = effects
                        .get(&effect_key(block))
                        .is_some_and(|state| !state.enabled);
                    if disabled {
                        commands.push(MidiCommand::EffectToggle {
                            block: block as i64,
                            enabled: false,
                        });
                    }
                }
                commands
            }
        };
        Ok(commands)
    }
}

/// A stored patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub id: u64,
    #[serde(flatten)]
    pub routing: Routing,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patch {
    pub fn new(id: u64, routing: Routing, now: DateTime<Utc>) -> Self {
        Self {
            id,
            routing,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full replace of the routing fields; `id` and `created_at` are kept.
    pub fn replaced(&self, routing: Routing, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            routing,
            created_at: self.created_at,
            updated_at: now,
        }
    }

    pub fn bank_slot(&self) -> Option<BankSlot> {
        self.routing.bank_slot()
    }

    pub fn commands(&self) -> Result<Vec<MidiCommand>> {
        self.routing.commands()
    }
}
