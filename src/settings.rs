//! Typed key/value settings.
//!
//! Values are persisted as text and coerced on read, so a key written as one
//! type and read as another simply reads as "not found". Writes are upserts:
//! last writer wins, no optimistic concurrency.

use crate::db::error::StoreError;
use std::str::FromStr;

/// The keys the furnace controller understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    /// Target temperature while the house is unoccupied (float, °C)
    IdleTemp,
    /// Minimum temperature while somebody is home (float, °C)
    ActiveTemp,
    /// Unix timestamp of the last manual override activation (int)
    Override,
    /// Last commanded furnace state (bool)
    FurnaceOn,
    /// Node whose readings drive the furnace (int)
    PrimaryNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Float,
    Bool,
    Int,
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::IdleTemp,
        SettingKey::ActiveTemp,
        SettingKey::Override,
        SettingKey::FurnaceOn,
        SettingKey::PrimaryNode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::IdleTemp => "idle_temp",
            SettingKey::ActiveTemp => "min_temp",
            SettingKey::Override => "override",
            SettingKey::FurnaceOn => "furnace_on",
            SettingKey::PrimaryNode => "primary_node",
        }
    }

    pub fn kind(self) -> SettingKind {
        match self {
            SettingKey::IdleTemp | SettingKey::ActiveTemp => SettingKind::Float,
            SettingKey::FurnaceOn => SettingKind::Bool,
            SettingKey::Override | SettingKey::PrimaryNode => SettingKind::Int,
        }
    }
}

impl FromStr for SettingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown setting key: {}", s))
    }
}

pub fn coerce_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn coerce_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "True" => Some(true),
        "0" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

pub fn coerce_int(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

/// Key/value persistence for small typed configuration values.
///
/// Implementors only provide raw text access; the typed accessors are built
/// on top. `Ok(None)` means the key was never written or its value cannot be
/// read as the requested type.
pub trait SettingsStore {
    fn get_value(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put_value(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn get_float(&self, key: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.get_value(key)?.as_deref().and_then(coerce_float))
    }

    fn set_float(&self, key: &str, value: f64) -> Result<(), StoreError> {
        self.put_value(key, &value.to_string())
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, StoreError> {
        Ok(self.get_value(key)?.as_deref().and_then(coerce_bool))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.put_value(key, if value { "1" } else { "0" })
    }

    fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.get_value(key)?.as_deref().and_then(coerce_int))
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.put_value(key, &value.to_string())
    }
}

/// Parse and store `raw` under `key`, checking it against the key's type.
pub fn set_from_str<S: SettingsStore + ?Sized>(store: &S, key: SettingKey, raw: &str) -> Result<(), String> {
    let name = key.as_str();
    let result = match key.kind() {
        SettingKind::Float => {
            let v = coerce_float(raw).ok_or_else(|| format!("{} expects a number, got {:?}", name, raw))?;
            store.set_float(name, v)
        }
        SettingKind::Bool => {
            let v = coerce_bool(raw).ok_or_else(|| format!("{} expects true/false, got {:?}", name, raw))?;
            store.set_bool(name, v)
        }
        SettingKind::Int => {
            let v = coerce_int(raw).ok_or_else(|| format!("{} expects an integer, got {:?}", name, raw))?;
            store.set_int(name, v)
        }
    };
    result.map_err(|e| format!("writing {} failed: {}", name, e))
}
