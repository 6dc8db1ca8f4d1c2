//! Leaf converters. Each constructor captures the attribute key (and label,
//! prefix or separator) and yields a [`ConvertFn`] for the schema tables.

use super::coerce::{to_int32, to_joined_string, to_string, to_timestamp};
use super::{ConvertFn, FieldError};
use crate::event::CanonicalEvent;
use serde_json::Value;

fn boxed<F>(f: F) -> ConvertFn
where
    F: Fn(&mut CanonicalEvent, &Value) -> Result<(), FieldError> + Send + Sync + 'static,
{
    Box::new(f)
}

pub fn string(key: &'static str) -> ConvertFn {
    boxed(move |event, value| {
        event.set_string(key, to_string(key, value)?);
        Ok(())
    })
}

pub fn string_with_prefix(key: &'static str, prefix: &'static str) -> ConvertFn {
    boxed(move |event, value| {
        let s = to_string(key, value)?;
        event.set_string(key, format!("{prefix}{s}"));
        Ok(())
    })
}

pub fn int32_else_string(key: &'static str) -> ConvertFn {
    boxed(move |event, value| set_int32_else_string(event, key, value))
}

pub fn timestamp(key: &'static str) -> ConvertFn {
    boxed(move |event, value| {
        event.set_timestamp(key, to_timestamp(key, value)?);
        Ok(())
    })
}

pub fn joined(key: &'static str, sep: &'static str) -> ConvertFn {
    boxed(move |event, value| {
        event.set_string(key, to_joined_string(key, value, sep)?);
        Ok(())
    })
}

/// String attribute plus a `label: value` line in the body.
pub fn labelled(key: &'static str, label: &'static str) -> ConvertFn {
    boxed(move |event, value| {
        let s = to_string(key, value)?;
        event.append_line(label, &s);
        event.set_string(key, s);
        Ok(())
    })
}

/// Integer-else-string attribute plus a `label: value` line in the body.
pub fn labelled_int32_else_string(key: &'static str, label: &'static str) -> ConvertFn {
    boxed(move |event, value| {
        let s = to_string(key, value)?;
        event.append_line(label, &s);
        set_int32_else_string(event, key, value)
    })
}

/// Blockchain `op` messages: only block announcements carry meaning.
pub fn blockchain_op(key: &'static str) -> ConvertFn {
    boxed(move |event, value| {
        if value.as_str() == Some("block") {
            event.set_string(key, "create");
            event.set_string("object", "block");
            event.text_data.push_str("New blockchain block created\n");
        }
        Ok(())
    })
}

fn set_int32_else_string(
    event: &mut CanonicalEvent,
    key: &str,
    value: &Value,
) -> Result<(), FieldError> {
    match to_int32(value) {
        Some(i) => event.set_integer(key, i),
        None => event.set_string(key, to_string(key, value)?),
    }
    Ok(())
}
