//! Demonstration owner state and command set served by the `tetherd` binary.
//!
//! The commands are deliberately small: they exist to exercise the broker
//! end to end, not to model any particular host application.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

use crate::dispatch::{Command, DispatchError, HandlerTable};
use crate::queue::{CallError, OwnerCall, owner_call};

/// Upper bound accepted by the `sleep` command.
const MAX_SLEEP_MS: u64 = 60_000;

/// State owned by the host's owner thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemoState {
    /// Shared counter mutated by `increment`.
    pub counter: i64,
    /// Key/value store mutated by `set_value`.
    pub values: BTreeMap<String, Value>,
}

/// Builds the demonstration command table.
///
/// | command       | fields                 | response                       |
/// |---------------|------------------------|--------------------------------|
/// | `echo`        | `value`                | `{"value": value}`             |
/// | `fail`        | `message` (optional)   | error                          |
/// | `increment`   | `by` (optional, 1)     | `{"counter": n}`               |
/// | `get_counter` |                        | `{"counter": n}`               |
/// | `set_value`   | `key`, `value`         | `{"key": key, "value": value}` |
/// | `get_value`   | `key`                  | `{"key": key, "value": value}` |
/// | `list_values` |                        | `{"values": {...}}`            |
/// | `ping`        |                        | `{"pong": true}`               |
/// | `sleep`       | `ms`                   | `{"slept_ms": ms}`             |
#[must_use]
pub fn demo_handlers() -> HandlerTable<DemoState> {
    let mut table = HandlerTable::new();
    table
        .register("echo", echo)
        .register("fail", fail)
        .register("increment", increment)
        .register("get_counter", |_command: Command| {
            Ok(owner_call(|state: &mut DemoState| {
                Ok(json!({ "counter": state.counter }))
            }))
        })
        .register("set_value", set_value)
        .register("get_value", get_value)
        .register("list_values", |_command: Command| {
            Ok(owner_call(|state: &mut DemoState| {
                Ok(json!({ "values": state.values }))
            }))
        })
        .register_with_timeout("ping", Duration::from_secs(5), |_command: Command| {
            Ok(owner_call(|_: &mut DemoState| Ok(json!({ "pong": true }))))
        })
        .register_with_timeout("sleep", Duration::from_secs(120), sleep);
    table
}

fn echo(command: Command) -> Result<OwnerCall<DemoState>, DispatchError> {
    let value = command.field("value").cloned().unwrap_or(Value::Null);
    Ok(owner_call(move |_: &mut DemoState| Ok(json!({ "value": value }))))
}

fn fail(command: Command) -> Result<OwnerCall<DemoState>, DispatchError> {
    let message = command
        .field("message")
        .and_then(Value::as_str)
        .unwrap_or("requested failure")
        .to_owned();
    Ok(owner_call(move |_: &mut DemoState| {
        Err(CallError::failed(message))
    }))
}

fn increment(command: Command) -> Result<OwnerCall<DemoState>, DispatchError> {
    let by = command.i64_field("by")?.unwrap_or(1);
    Ok(owner_call(move |state: &mut DemoState| {
        state.counter = state
            .counter
            .checked_add(by)
            .ok_or_else(|| CallError::failed("counter overflow"))?;
        Ok(json!({ "counter": state.counter }))
    }))
}

fn set_value(mut command: Command) -> Result<OwnerCall<DemoState>, DispatchError> {
    let key = command.str_field("key")?.to_owned();
    let value = command
        .take_field("value")
        .ok_or_else(|| DispatchError::invalid_arguments("'value' is required"))?;
    Ok(owner_call(move |state: &mut DemoState| {
        state.values.insert(key.clone(), value.clone());
        Ok(json!({ "key": key, "value": value }))
    }))
}

fn get_value(command: Command) -> Result<OwnerCall<DemoState>, DispatchError> {
    let key = command.str_field("key")?.to_owned();
    Ok(owner_call(move |state: &mut DemoState| {
        match state.values.get(&key) {
            Some(value) => Ok(json!({ "key": key, "value": value })),
            None => Err(CallError::failed(format!("No value stored for key '{key}'"))),
        }
    }))
}

fn sleep(command: Command) -> Result<OwnerCall<DemoState>, DispatchError> {
    let ms = command
        .i64_field("ms")?
        .and_then(|ms| u64::try_from(ms).ok())
        .filter(|ms| *ms <= MAX_SLEEP_MS)
        .ok_or_else(|| {
            DispatchError::invalid_arguments(format!("'ms' must be between 0 and {MAX_SLEEP_MS}"))
        })?;
    Ok(owner_call(move |_: &mut DemoState| {
        thread::sleep(Duration::from_millis(ms));
        Ok(json!({ "slept_ms": ms }))
    }))
}
