//! Canonical extended JSON codec used at the transport boundary.
//!
//! Requests are always written in canonical (non-relaxed) form so that the
//! int32 / int64 / double distinction survives the trip to the proxy. Replies
//! are decoded in two passes: the text is parsed as plain JSON, then the tree
//! is walked and every recognized extended-JSON tag is turned into the matching
//! [`Bson`] variant.
//!
//! `$numberInt` and `$numberDouble` collapse to the plain numeric variants.
//! `$numberDecimal` and `$numberLong` always stay typed, even when the value
//! would fit in a smaller number. An object that carries a tag but fails to
//! parse is kept as a plain document instead of raising an error.

use crate::error::{MongoError, Result};
use bson::{Bson, Document};
use serde_json::{Map, Number, Value as JsonValue};
use tracing::debug;

/// Keys that mark an object as a canonical extended JSON value.
const EXTENDED_TAGS: &[&str] = &[
    "$oid",
    "$symbol",
    "$numberInt",
    "$numberLong",
    "$numberDouble",
    "$numberDecimal",
    "$binary",
    "$code",
    "$timestamp",
    "$regularExpression",
    "$dbPointer",
    "$date",
    "$minKey",
    "$maxKey",
    "$undefined",
];

/// Encode a value as canonical extended JSON text.
pub fn encode(value: &Bson) -> Result<String> {
    let json = value.clone().into_canonical_extjson();
    Ok(serde_json::to_string(&json)?)
}

/// Encode a document as canonical extended JSON text.
pub fn encode_document(document: &Document) -> Result<String> {
    encode(&Bson::Document(document.clone()))
}

/// Decode extended JSON text into a value.
pub fn decode(text: &str) -> Result<Bson> {
    let json: JsonValue = serde_json::from_str(text)?;
    Ok(from_json(json))
}

/// Decode extended JSON text that must hold a document.
pub fn decode_document(text: &str) -> Result<Document> {
    match decode(text)? {
        Bson::Document(document) => Ok(document),
        other => Err(MongoError::Ejson(format!(
            "expected a document, found {:?}",
            other.element_type()
        ))),
    }
}

/// Convert an already parsed JSON tree into a value.
///
/// This is the second decoding pass and never fails: anything that is not a
/// valid extended value is carried over as plain data.
pub fn from_json(json: JsonValue) -> Bson {
    match json {
        JsonValue::Null => Bson::Null,
        JsonValue::Bool(v) => Bson::Boolean(v),
        JsonValue::String(s) => Bson::String(s),
        JsonValue::Number(n) => number_to_bson(&n),
        JsonValue::Array(arr) => Bson::Array(arr.into_iter().map(from_json).collect()),
        JsonValue::Object(obj) => object_to_bson(obj),
    }
}

/// Check whether a key is one of the canonical extended JSON tags.
pub fn is_extended_tag(key: &str) -> bool {
    EXTENDED_TAGS.contains(&key)
}

fn number_to_bson(n: &Number) -> Bson {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        }
    } else {
        // u64 beyond i64::MAX or a real float
        Bson::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn object_to_bson(obj: Map<String, JsonValue>) -> Bson {
    if obj.keys().any(|k| is_extended_tag(k)) {
        match Bson::try_from(JsonValue::Object(obj.clone())) {
            Ok(value) => return value,
            Err(err) => {
                debug!(error = %err, "keeping malformed extended json value as a document");
            }
        }
    }

    let mut doc = Document::new();
    for (k, v) in obj {
        doc.insert(k, from_json(v));
    }
    Bson::Document(doc)
}
