// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Output registrations, fixed before the run starts.

use std::collections::HashSet;

use crate::core::packets::PayloadKind;
use crate::core::{GraphError, Result};

/// A value channel and the payload kind it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub kind: PayloadKind,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, kind: PayloadKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One registration: a plain value channel, or a presence gate with the
/// value channels it guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputBinding {
    Ungated(ChannelSpec),
    Gated {
        gate: String,
        values: Vec<ChannelSpec>,
    },
}

impl OutputBinding {
    pub fn value_channels(&self) -> &[ChannelSpec] {
        match self {
            Self::Ungated(spec) => std::slice::from_ref(spec),
            Self::Gated { values, .. } => values,
        }
    }
}

/// Ordered set of bindings. Fetch order is registration order.
#[derive(Debug, Clone, Default)]
pub struct OutputPlan {
    bindings: Vec<OutputBinding>,
    names: HashSet<String>,
}

impl OutputPlan {
    pub fn push(&mut self, binding: OutputBinding) -> Result<()> {
        let mut incoming: Vec<&str> = binding
            .value_channels()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        if let OutputBinding::Gated { gate, values } = &binding {
            if values.is_empty() {
                return Err(GraphError::Configuration(format!(
                    "presence gate '{}' guards no value channels",
                    gate
                )));
            }
            incoming.push(gate.as_str());
        }

        let mut seen = HashSet::new();
        for name in &incoming {
            if self.names.contains(*name) || !seen.insert(*name) {
                return Err(GraphError::Configuration(format!(
                    "output '{}' registered twice",
                    name
                )));
            }
        }

        self.names.extend(incoming.into_iter().map(str::to_string));
        self.bindings.push(binding);
        Ok(())
    }

    pub fn bindings(&self) -> &[OutputBinding] {
        &self.bindings
    }

    pub fn value_channels(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.bindings.iter().flat_map(|b| b.value_channels())
    }

    pub fn kind_of(&self, channel: &str) -> Option<PayloadKind> {
        self.value_channels()
            .find(|s| s.name == channel)
            .map(|s| s.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
