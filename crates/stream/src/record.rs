use serde::Deserialize;
use serde::de::{Error as _, Unexpected};
use snafu::ResultExt;

use crate::error::{RecordError, SchemaSnafu, SyntaxSnafu};
use crate::message::StreamMessage;

const PREVIEW_CHARS: usize = 120;

/// Parses and validates one candidate line.
pub fn parse_record(line: &str) -> Result<StreamMessage, RecordError> {
    let value: serde_json::Value = serde_json::from_str(line).context(SyntaxSnafu {
        stage: "parse-record-json",
    })?;

    // Tagged enums also accept a sequence with the tag first; only objects are records.
    let fields = match value {
        serde_json::Value::Object(fields) => fields,
        other => {
            return Err(serde_json::Error::invalid_type(
                unexpected_shape(&other),
                &"a JSON object",
            ))
            .context(SchemaSnafu {
                stage: "validate-record-shape",
            });
        }
    };

    StreamMessage::deserialize(serde_json::Value::Object(fields)).context(SchemaSnafu {
        stage: "validate-record-schema",
    })
}

fn unexpected_shape(value: &serde_json::Value) -> Unexpected<'_> {
    match value {
        serde_json::Value::Null => Unexpected::Unit,
        serde_json::Value::Bool(flag) => Unexpected::Bool(*flag),
        serde_json::Value::Number(_) => Unexpected::Other("number"),
        serde_json::Value::String(text) => Unexpected::Str(text),
        serde_json::Value::Array(_) => Unexpected::Seq,
        serde_json::Value::Object(_) => Unexpected::Map,
    }
}

/// Filtering form of [`parse_record`]: invalid lines are logged and dropped.
pub fn decode_record(line: &str) -> Option<StreamMessage> {
    match parse_record(line) {
        Ok(message) => Some(message),
        Err(error) => {
            tracing::warn!(
                syntax = error.is_syntax(),
                error = %error,
                line = %preview(line),
                "dropping malformed stream record"
            );
            None
        }
    }
}

fn preview(line: &str) -> String {
    let mut chars = line.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
