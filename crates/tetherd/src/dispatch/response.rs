//! Response serialization for the session loop.
//!
//! Every response is one JSON object followed by `\n`. Successful values that
//! are not objects are wrapped as `{"result": value}`; failures are written as
//! `{"error": message}`.

use std::io::Write;

use serde_json::{Map, Value, json};

use super::errors::DispatchError;

/// Writes newline-delimited JSON responses to a stream.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Creates a writer over the given output stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a success response and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, writing, or flushing fails.
    pub fn write_value(&mut self, value: Value) -> Result<(), DispatchError> {
        let object = match value {
            Value::Object(object) => object,
            other => {
                let mut object = Map::new();
                object.insert(String::from("result"), other);
                object
            }
        };
        self.write_line(&Value::Object(object))
    }

    /// Writes `{"error": <display of error>}` and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub fn write_error(&mut self, error: &DispatchError) -> Result<(), DispatchError> {
        self.write_line(&json!({ "error": error.to_string() }))
    }

    fn write_line(&mut self, value: &Value) -> Result<(), DispatchError> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
