//! Float encoding for the schemaless store.
//!
//! The record store's numeric type is decimal, not IEEE 754; handing it a
//! raw float is how the "float rejected" class of persistence errors
//! happens. Every document traverses this conversion when materialised for
//! persistence: floating-point numbers anywhere in the nested structure are
//! rounded through [`rust_decimal::Decimal`] to at most six significant
//! digits. The conversion is lossless for decimals with ≤ 6 significant
//! digits; the computation core keeps native floats throughout.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};

use crate::StoreError;

/// Significant digits preserved by the store encoding.
pub const STORE_SIGNIFICANT_DIGITS: u32 = 6;

/// Recursively convert every floating-point number in `value` to its
/// store-safe decimal form. Integers pass through untouched.
pub fn encode_for_store(value: &Value) -> Result<Value, StoreError> {
    match value {
        Value::Number(n) => encode_number(n).map(Value::Number),
        Value::Array(items) => items
            .iter()
            .map(encode_for_store)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut encoded = Map::with_capacity(map.len());
            for (key, item) in map {
                encoded.insert(key.clone(), encode_for_store(item)?);
            }
            Ok(Value::Object(encoded))
        }
        other => Ok(other.clone()),
    }
}

fn encode_number(n: &Number) -> Result<Number, StoreError> {
    // Integers already fit the store's numeric type.
    if n.is_i64() || n.is_u64() {
        return Ok(n.clone());
    }
    let float = n
        .as_f64()
        .ok_or_else(|| StoreError::Encoding(format!("unrepresentable number {n}")))?;
    if !float.is_finite() {
        return Err(StoreError::Encoding(format!(
            "non-finite number {float} cannot be stored"
        )));
    }

    let decimal = Decimal::from_f64_retain(float)
        .ok_or_else(|| StoreError::Encoding(format!("number {float} out of decimal range")))?;
    let rounded = decimal
        .round_sf(STORE_SIGNIFICANT_DIGITS)
        .unwrap_or(decimal)
        .normalize();

    let back = rounded
        .to_f64()
        .ok_or_else(|| StoreError::Encoding(format!("decimal {rounded} out of float range")))?;
    Number::from_f64(back)
        .ok_or_else(|| StoreError::Encoding(format!("decimal {rounded} is not a JSON number")))
}
