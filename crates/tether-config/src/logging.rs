//! Log output formats understood by the telemetry layer.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("JSON", LogFormat::Json)]
    #[case("compact", LogFormat::Compact)]
    fn parses_log_format_case_insensitively(#[case] input: &str, #[case] expected: LogFormat) {
        let parsed: LogFormat = input.parse().expect("format should parse");
        assert_eq!(parsed, expected);
    }

    #[test]
    fn rejects_unknown_format() {
        let result = "pretty".parse::<LogFormat>();
        assert!(result.is_err());
    }

    #[test]
    fn displays_snake_case() {
        assert_eq!(LogFormat::Compact.to_string(), "compact");
    }
}
