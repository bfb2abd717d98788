use serde::{Deserialize, Serialize};

/// Raw register values before scale/offset transforms are applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RawValue {
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
}

impl RawValue {
    /// Numeric view of the raw value. Booleans map to 0.0/1.0.
    pub fn as_f64(&self) -> f64 {
        match *self {
            RawValue::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            RawValue::I16(v) => f64::from(v),
            RawValue::U16(v) => f64::from(v),
            RawValue::I32(v) => f64::from(v),
            RawValue::U32(v) => f64::from(v),
            RawValue::F32(v) => f64::from(v),
        }
    }
}

/// A decoded reading as published in a device snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Bool(bool),
    Number(f64),
}

impl Reading {
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Reading::Number(v) => Some(v),
            Reading::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Reading::Bool(v) => Some(v),
            Reading::Number(_) => None,
        }
    }
}

/// Identity of a single heat pump endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub host: String,
    pub unit_id: u8,
}
