//! Controller State Tracker
//!
//! Holds the last known value of every control and turns each new input
//! report into the set of controls whose value actually changed.

use crate::domain::models::{ControlId, ControlValue, DpadDirection};
use crate::domain::report::InputReport;
use crate::domain::settings::PublishTable;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The dpad nibble is outside 0..=8. Treated as corrupt data.
    #[error("dpad value {0} out of range (expected 0..=8)")]
    InvalidDpad(u8),
}

/// Stick axis byte to a signed percentage, 128 is centered.
///
/// Range is -100.0 ..= 99.21875.
pub fn sign_pct(value: u8) -> f32 {
    ((value as i32 - 128) as f64 / 128.0 * 100.0) as f32
}

/// Trigger byte to an unsigned percentage, 0.0 ..= 100.0.
pub fn unsign_pct(value: u8) -> f32 {
    (value as f64 / 255.0 * 100.0) as f32
}

/// Button bit positions: (control, use buttons2, mask).
const BUTTON_BITS: [(ControlId, bool, u8); 15] = [
    (ControlId::Rsb, false, 0x80),
    (ControlId::Opt, false, 0x40),
    (ControlId::Men, false, 0x20),
    (ControlId::Stb, false, 0x10),
    (ControlId::Rtb, false, 0x08),
    (ControlId::Ltb, false, 0x04),
    (ControlId::Gas, false, 0x02),
    (ControlId::Cpt, false, 0x01),
    (ControlId::Lab, true, 0x40),
    (ControlId::Lbb, true, 0x20),
    (ControlId::Lxb, true, 0x10),
    (ControlId::Lyb, true, 0x08),
    (ControlId::Lbp, true, 0x04),
    (ControlId::Rbp, true, 0x02),
    (ControlId::Lsb, true, 0x01),
];

/// One control whose stored value was overwritten by an update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlChange {
    pub id: ControlId,
    pub value: ControlValue,
    /// Whether this control is wired to the output.
    pub publish: bool,
}

pub struct ControllerState {
    values: [ControlValue; ControlId::COUNT],
    publish: PublishTable,
}

impl ControllerState {
    /// All controls start neutral: released, centered, zero.
    pub fn new(publish: PublishTable) -> Self {
        Self {
            values: ControlId::ALL.map(|id| ControlValue::neutral(id.kind())),
            publish,
        }
    }

    pub fn value(&self, id: ControlId) -> ControlValue {
        self.values[id.index()]
    }

    /// Apply a report and return every control that changed, in report order.
    ///
    /// Nothing is mutated when the dpad is out of range.
    pub fn update(&mut self, report: &InputReport) -> Result<Vec<ControlChange>, TrackerError> {
        let dpad = DpadDirection::from_raw(report.dpad)
            .ok_or(TrackerError::InvalidDpad(report.dpad))?;

        let mut changes = Vec::new();

        self.apply(ControlId::Dpd, ControlValue::DPad(dpad), &mut changes);

        for (id, second_group, mask) in BUTTON_BITS {
            let byte = if second_group {
                report.buttons2
            } else {
                report.buttons1
            };
            self.apply(id, ControlValue::Button(byte & mask != 0), &mut changes);
        }

        // Y axes are inverted so that pushing up reads positive.
        self.apply(
            ControlId::Ljs,
            ControlValue::Stick {
                x: sign_pct(report.stick_x),
                y: -sign_pct(report.stick_y),
            },
            &mut changes,
        );
        self.apply(
            ControlId::Rjs,
            ControlValue::Stick {
                x: sign_pct(report.stick_z),
                y: -sign_pct(report.stick_rz),
            },
            &mut changes,
        );

        self.apply(
            ControlId::Ltr,
            ControlValue::Trigger(unsign_pct(report.brake)),
            &mut changes,
        );
        self.apply(
            ControlId::Rtr,
            ControlValue::Trigger(unsign_pct(report.throttle)),
            &mut changes,
        );

        Ok(changes)
    }

    fn apply(&mut self, id: ControlId, value: ControlValue, changes: &mut Vec<ControlChange>) {
        let slot = &mut self.values[id.index()];
        if *slot == value {
            return;
        }
        *slot = value;
        changes.push(ControlChange {
            id,
            value,
            publish: self.publish.is_enabled(id),
        });
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==============================")?;
        writeln!(f, "      Controller State:")?;
        for id in ControlId::ALL {
            match self.value(id) {
                ControlValue::Button(pressed) => writeln!(f, "{}: {}", id, pressed as u8)?,
                ControlValue::Stick { x, y } => writeln!(f, "{}: ({:.6}, {:.6})", id, x, y)?,
                ControlValue::Trigger(v) => writeln!(f, "{}: {:.6}", id, v)?,
                ControlValue::DPad(dir) => writeln!(f, "{}: {}", id, dir.code())?,
            }
        }
        write!(f, "==============================")
    }
}
