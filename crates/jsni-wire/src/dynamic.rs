//! Conversion between [`JsniValue`] and untyped JSON values.
//!
//! This is the one place where a kind is inferred from the shape of a value.
//! Any number with an integral value that fits 64 bits becomes `I64`, whether
//! it was written as `5` or `5.0`; every other number becomes `F64`. Integers
//! above `i64::MAX` keep their 64-bit pattern and read back as negative.

use serde_json::{Number, Value};

use crate::error::{WireError, WireResult};
use crate::value::JsniValue;

impl JsniValue {
    /// Classify a JSON value into a wire value.
    ///
    /// # Errors
    ///
    /// Arrays and objects have no kind and return [`WireError::Unencodable`].
    pub fn from_json(value: &Value) -> WireResult<Self> {
        match value {
            Value::Null => Ok(JsniValue::Null),
            Value::Bool(b) => Ok(JsniValue::Bool(*b)),
            Value::String(s) => Ok(JsniValue::String(s.clone())),
            Value::Number(n) => classify_number(n),
            Value::Array(_) => Err(WireError::Unencodable("array".to_string())),
            Value::Object(_) => Err(WireError::Unencodable("object".to_string())),
        }
    }

    /// Convert into an untyped JSON value.
    ///
    /// Bytes become an array of numbers and a char becomes a one-character
    /// string (lone surrogates map to U+FFFD). Non-finite floats become null.
    pub fn to_json(&self) -> Value {
        match self {
            JsniValue::I8(v) => Value::from(*v),
            JsniValue::I16(v) => Value::from(*v),
            JsniValue::I32(v) => Value::from(*v),
            JsniValue::I64(v) => Value::from(*v),
            JsniValue::U8(v) => Value::from(*v),
            JsniValue::U16(v) => Value::from(*v),
            JsniValue::U32(v) => Value::from(*v),
            JsniValue::U64(v) => Value::from(*v),
            JsniValue::F32(v) => float_to_json(*v as f64),
            JsniValue::F64(v) => float_to_json(*v),
            JsniValue::Bool(v) => Value::Bool(*v),
            JsniValue::Char(unit) => {
                let c = char::decode_utf16([*unit])
                    .next()
                    .and_then(Result::ok)
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                Value::String(c.to_string())
            }
            JsniValue::String(s) => Value::String(s.clone()),
            JsniValue::Bytes(b) => Value::Array(b.iter().map(|&byte| Value::from(byte)).collect()),
            JsniValue::Null => Value::Null,
        }
    }
}

fn classify_number(n: &Number) -> WireResult<JsniValue> {
    if let Some(i) = n.as_i64() {
        return Ok(JsniValue::I64(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(JsniValue::I64(u as i64));
    }
    let v = n
        .as_f64()
        .ok_or_else(|| WireError::Unencodable(format!("number {n}")))?;
    // -2^63 <= v < 2^63
    let in_range = (-9.223_372_036_854_776e18..9.223_372_036_854_776e18).contains(&v);
    if in_range && v.fract() == 0.0 {
        return Ok(JsniValue::I64(v as i64));
    }
    Ok(JsniValue::F64(v))
}

fn float_to_json(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}
