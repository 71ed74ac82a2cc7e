// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! JSON representation
//!
//! A register is represented by its visible value. Value-level conflicts, which arise from
//! concurrent assignments, are represented as a JSON array of the live values, winner first.
//!
//! ```json
//! 8.0
//! ```
//!
//! ```json
//! [7.0, 3.0]
//! ```
//!
//! Separately, the complete state of a replica can be stored as JSON with
//! [`ScalingRegister::to_json`] and restored with [`ScalingRegister::from_json`].
//!
//! JSON has no representation for NaN or the infinities. They are rendered as `null`, and a
//! snapshot holding such a value cannot be restored.
use crate::{ScalingRegister, crdts::NumericCell, register::RegisterSnapshot};
use serde_json::Value;

/// Converts the visible state of a [`ScalingRegister`] to a `serde_json::Value`.
///
/// * If there are no conflicting assignments, it returns the value.
/// * Otherwise, it returns an array of the values of all live assignments, winner first.
impl From<&ScalingRegister> for Value {
    fn from(reg: &ScalingRegister) -> Self {
        if reg.conflicts().len() == 0 {
            return reg.value().into();
        }
        Value::Array(
            reg.winner()
                .into_iter()
                .chain(reg.conflicts())
                .map(|cell| NumericCell::value(cell).into())
                .collect(),
        )
    }
}

impl ScalingRegister {
    /// Serializes the complete state of this replica.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.snapshot())
    }

    /// Restores a replica from the output of [`ScalingRegister::to_json`].
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let snapshot: RegisterSnapshot = serde_json::from_value(value)?;
        Ok(Self::from_snapshot(snapshot))
    }
}
