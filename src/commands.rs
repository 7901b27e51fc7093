//! Inbound command events from the transport collaborator
//!
//! Events arrive as plain camelCase records (the console sends frequencies
//! in MHz and TDOA sample counts in millions); the engine converts units at
//! ingestion.

use serde::{Deserialize, Deserializer};

/// One command event from the remote console.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Command {
    StartScan,
    StartTdoa,
    ChangeScanSettings(ScanSettings),
    ChangeTdoaSettings(TdoaSettings),
    SetTriggerSettings(TriggerSettings),
    ActivateTrigger,
    DeactivateTrigger,
    ChannelOpen,
    ChannelClose,
}

/// Sweep span update. Frequencies in MHz.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSettings {
    #[serde(default, deserialize_with = "opt_float")]
    pub center_freq: Option<f64>,
    #[serde(default, deserialize_with = "opt_float")]
    pub bandwidth: Option<f64>,
}

/// TDOA job update. Frequencies in MHz, samples in millions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TdoaSettings {
    #[serde(default, deserialize_with = "opt_float")]
    pub target_frequency: Option<f64>,
    #[serde(default, deserialize_with = "opt_float")]
    pub reference_frequency: Option<f64>,
    #[serde(default, deserialize_with = "opt_float")]
    pub samples: Option<f64>,
}

/// Trigger sub-band update. Frequencies in MHz, level in dB.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSettings {
    #[serde(default, deserialize_with = "opt_float")]
    pub db_level: Option<f64>,
    #[serde(default, deserialize_with = "opt_float")]
    pub bandwidth: Option<f64>,
    #[serde(default, deserialize_with = "opt_float")]
    pub target_frequency: Option<f64>,
}

/// The console serializes some numeric fields as strings; accept either.
fn opt_float<'de, D>(de: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    Ok(match Option::<Raw>::deserialize(de)? {
        Some(Raw::Num(v)) => Some(v),
        Some(Raw::Str(s)) => s.trim().parse().ok(),
        None => None,
    })
}
