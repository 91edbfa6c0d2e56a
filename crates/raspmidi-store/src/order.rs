use std::cmp::Ordering;
use std::str::FromStr;

use raspmidi_core::Patch;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Sort order for [`PatchStore::list`](crate::PatchStore::list).
///
/// Patches lacking the sort key come last. Ties always break by `id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOrder {
    #[default]
    Insertion,
    InputChannel,
    BankSlot,
    CreatedAt,
}

impl FromStr for PatchOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "insertion" | "id" => Ok(PatchOrder::Insertion),
            "input_channel" | "channel" => Ok(PatchOrder::InputChannel),
            "bank_slot" | "zoom" => Ok(PatchOrder::BankSlot),
            "created_at" => Ok(PatchOrder::CreatedAt),
            other => Err(Error::Validation(format!(
                "Unknown order '{other}': expected insertion, input_channel, bank_slot or created_at"
            ))),
        }
    }
}

fn missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl PatchOrder {
    pub(crate) fn compare(&self, a: &Patch, b: &Patch) -> Ordering {
        let primary = match self {
            PatchOrder::Insertion => Ordering::Equal,
            PatchOrder::InputChannel => {
                missing_last(a.routing.input_channel, b.routing.input_channel)
            }
            PatchOrder::BankSlot => missing_last(a.bank_slot(), b.bank_slot()),
            PatchOrder::CreatedAt => a.created_at.cmp(&b.created_at),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}
