use mongodb::bson::Document;
use serde_json::Value as JsonValue;
use snafu::{ResultExt as _, Snafu};

/// A document parsing error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ParseError {
    /// The text is not well-formed JSON.
    #[snafu(display("Failed to parse event as JSON: {}", source))]
    Syntax {
        /// Error source.
        source: serde_json::Error,
    },

    /// The text is well-formed JSON, but its top-level value is not an object.
    #[snafu(display("Expected a JSON object at the top level, found {}.", found))]
    NotADocument {
        /// Kind of value found instead.
        found: &'static str,
    },

    /// The object uses an Extended JSON form (`$oid`, `$date`, ...) with an invalid value.
    #[snafu(display("Invalid Extended JSON value: {}", reason))]
    ExtendedJson {
        /// Reason given by the converter.
        reason: String,
    },
}

/// Parses `text` as a document.
///
/// Any JSON object is accepted, including nested objects and arrays; there is no schema. Values written in MongoDB
/// Extended JSON (for example `{"$oid": "..."}` or `{"$date": ...}`) are converted to their native BSON types.
///
/// # Errors
///
/// If `text` is not well-formed JSON, its top-level value is not an object, or it contains malformed Extended JSON, an
/// error is returned.
pub fn parse_document(text: &str) -> Result<Document, ParseError> {
    let value: JsonValue = serde_json::from_str(text).context(Syntax)?;
    match value {
        JsonValue::Object(map) => Document::try_from(map).map_err(|e| ParseError::ExtendedJson { reason: e.to_string() }),
        other => Err(ParseError::NotADocument {
            found: json_kind(&other),
        }),
    }
}

const fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{doc, Bson};

    use super::*;

    #[test]
    fn flat_object() {
        let document = parse_document(r#"{"id":1,"val":"a"}"#).unwrap();
        assert_eq!(document, doc! { "id": 1, "val": "a" });
    }

    #[test]
    fn nested_values() {
        let document =
            parse_document(r#"{"track":{"id":"T1","points":[[1.5,2.5],[3.0,4.0]]},"tags":[],"speed":null}"#).unwrap();

        assert_eq!(
            document,
            doc! {
                "track": { "id": "T1", "points": [[1.5, 2.5], [3.0, 4.0]] },
                "tags": [],
                "speed": Bson::Null,
            }
        );
    }

    #[test]
    fn preserves_key_order() {
        let document = parse_document(r#"{"z":1,"a":2,"m":3}"#).unwrap();
        let keys = document.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn extended_json_object_id() {
        let document = parse_document(r#"{"_id":{"$oid":"507f1f77bcf86cd799439011"}}"#).unwrap();
        assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn invalid_extended_json() {
        let result = parse_document(r#"{"_id":{"$oid":"not-an-object-id"}}"#);
        assert!(matches!(result, Err(ParseError::ExtendedJson { .. })));
    }

    #[test]
    fn malformed_syntax() {
        for input in ["not-json", "", "{", r#"{"id":}"#, r#"{"id":1}}"#] {
            let result = parse_document(input);
            assert!(matches!(result, Err(ParseError::Syntax { .. })), "input: {:?}", input);
        }
    }

    #[test]
    fn top_level_must_be_object() {
        let cases = [
            ("[1,2]", "an array"),
            ("42", "a number"),
            ("\"text\"", "a string"),
            ("true", "a boolean"),
            ("null", "null"),
        ];

        for (input, expected) in cases {
            match parse_document(input) {
                Err(ParseError::NotADocument { found }) => assert_eq!(found, expected),
                other => panic!("unexpected result for {:?}: {:?}", input, other),
            }
        }
    }
}
