//! Request decoding for the session loop.
//!
//! A request is one JSON object with a string `command` field; every other
//! field is command-specific and passed through to the handler untouched.

use serde_json::{Map, Value};

use super::errors::DispatchError;

/// Decoded client command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    fields: Map<String, Value>,
}

impl Command {
    /// Parses one request line. Surrounding ASCII whitespace, including the
    /// `\r` of CRLF framing, is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidJson`] when the line does not parse and
    /// [`DispatchError::InvalidCommand`] when it is not an object with a
    /// non-empty string `command` field.
    pub fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let value: Value = serde_json::from_slice(line.trim_ascii())
            .map_err(|source| DispatchError::InvalidJson { source })?;
        let Value::Object(mut fields) = value else {
            return Err(DispatchError::invalid_command("request must be a JSON object"));
        };
        let name = match fields.remove("command") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_owned(),
            Some(Value::String(_)) => {
                return Err(DispatchError::invalid_command("command field is empty"));
            }
            Some(_) => {
                return Err(DispatchError::invalid_command("command field must be a string"));
            }
            None => return Err(DispatchError::invalid_command("missing command field")),
        };
        Ok(Self { name, fields })
    }

    /// Builds a command directly, mainly for tests and in-process callers.
    pub fn new(name: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Command name used for handler lookup.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a field by name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns a required string field.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidArguments`] when the field is missing
    /// or not a string.
    pub fn str_field(&self, key: &str) -> Result<&str, DispatchError> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::invalid_arguments(format!("'{key}' must be a string")))
    }

    /// Returns an optional integer field.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidArguments`] when the field is present
    /// but not an integer.
    pub fn i64_field(&self, key: &str) -> Result<Option<i64>, DispatchError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_i64().map(Some).ok_or_else(|| {
                DispatchError::invalid_arguments(format!("'{key}' must be an integer"))
            }),
        }
    }

    /// Removes and returns a field, leaving `None` behind.
    pub fn take_field(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// All command-specific fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consumes the command, returning its fields.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_command_and_keeps_other_fields() {
        let command = Command::parse(br#"{"command":"echo","value":"hi"}"#).expect("parse echo");
        assert_eq!(command.name(), "echo");
        assert_eq!(command.field("value"), Some(&json!("hi")));
        assert!(command.field("command").is_none());
        assert_eq!(command.str_field("value").expect("string field"), "hi");
    }

    #[test]
    fn tolerates_crlf_and_padding() {
        let command = Command::parse(b"  {\"command\":\"ping\"}\r\n").expect("parse ping");
        assert_eq!(command.name(), "ping");
        assert!(command.fields().is_empty());
    }

    #[rstest]
    #[case(b"not json".as_slice())]
    #[case(b"{\"command\":\"e".as_slice())]
    #[case(b"".as_slice())]
    fn rejects_malformed_json(#[case] line: &[u8]) {
        assert!(matches!(
            Command::parse(line),
            Err(DispatchError::InvalidJson { .. })
        ));
    }

    #[rstest]
    #[case(br#"[1,2]"#.as_slice())]
    #[case(br#"{"value":1}"#.as_slice())]
    #[case(br#"{"command":7}"#.as_slice())]
    #[case(br#"{"command":"  "}"#.as_slice())]
    fn rejects_objects_without_a_command(#[case] line: &[u8]) {
        assert!(matches!(
            Command::parse(line),
            Err(DispatchError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn typed_field_accessors_report_bad_arguments() {
        let mut command =
            Command::parse(br#"{"command":"increment","by":"two","key":1}"#).expect("parse");
        assert!(matches!(
            command.i64_field("by"),
            Err(DispatchError::InvalidArguments { .. })
        ));
        assert!(matches!(
            command.str_field("key"),
            Err(DispatchError::InvalidArguments { .. })
        ));
        assert_eq!(command.i64_field("missing").expect("absent is fine"), None);
        assert_eq!(command.take_field("key"), Some(json!(1)));
        assert_eq!(command.into_fields().len(), 1);
    }
}
