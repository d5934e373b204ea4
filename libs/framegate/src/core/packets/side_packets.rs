// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::BTreeMap;

/// Value of a side-configuration packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidePacketValue {
    Int(i32),
    Bool(bool),
}

impl From<i32> for SidePacketValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for SidePacketValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Named one-shot values handed to the engine at run start.
///
/// Immutable once the run starts; the runner only ever passes a shared
/// reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidePackets {
    values: BTreeMap<String, SidePacketValue>,
}

impl SidePackets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SidePacketValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<SidePacketValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<SidePacketValue> {
        self.values.get(name).copied()
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        match self.get(name)? {
            SidePacketValue::Int(v) => Some(v),
            SidePacketValue::Bool(_) => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            SidePacketValue::Bool(v) => Some(v),
            SidePacketValue::Int(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SidePacketValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
