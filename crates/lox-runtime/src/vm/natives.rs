//! Built-in native functions
//!
//! Natives are synchronous host callables registered into the globals table
//! at VM construction. They receive their arguments as a slice and must not
//! retain it.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;

/// `clock()`: seconds since the Unix epoch, as a double
pub fn clock(_args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}
