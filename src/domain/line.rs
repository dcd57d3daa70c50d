//! Output line format
//!
//! Every change is one newline-terminated ASCII record, fields separated by `;`:
//!
//! ```text
//! Button : <id>;<0|1>
//! Stick  : <id>;<x>;<y>        (two decimals)
//! Trigger: <id>;<value>        (two decimals)
//! DPad   : <id>;<N|NE|E|SE|S|SW|W|NW|NO>
//! ```

use crate::domain::controller::ControlChange;
use crate::domain::models::{ControlId, ControlValue};
use std::fmt;

pub const FIELD_SEPARATOR: char = ';';
pub const LINE_TERMINATOR: char = '\n';

/// Formats one control value as an output record, terminator included.
pub struct ControlLine {
    pub id: ControlId,
    pub value: ControlValue,
}

impl ControlLine {
    pub fn new(id: ControlId, value: ControlValue) -> Self {
        Self { id, value }
    }
}

impl From<&ControlChange> for ControlLine {
    fn from(change: &ControlChange) -> Self {
        Self::new(change.id, change.value)
    }
}

/// Two-decimal percentage, with negative zero printed as `0.00`.
struct Pct(f32);

impl fmt::Display for Pct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = if self.0 == 0.0 { 0.0 } else { self.0 };
        write!(f, "{:.2}", v)
    }
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.id, FIELD_SEPARATOR)?;
        match self.value {
            ControlValue::Button(pressed) => write!(f, "{}", if pressed { '1' } else { '0' })?,
            ControlValue::Stick { x, y } => write!(f, "{}{}{}", Pct(x), FIELD_SEPARATOR, Pct(y))?,
            ControlValue::Trigger(v) => write!(f, "{}", Pct(v))?,
            ControlValue::DPad(dir) => f.write_str(dir.code())?,
        }
        write!(f, "{}", LINE_TERMINATOR)
    }
}
