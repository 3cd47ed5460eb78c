//! Structured envelopes delivered by context backends, and their unwrapping.
//!
//! A normative-type update looks like:
//!
//! ```text
//! structure
//!   value        <array or scalar>
//!   timeStamp
//!     secondsPastEpoch  <int>
//!     nanoseconds       <int>
//!   ...
//! ```
//!
//! Only the leaf under `value` (or `data`) and the timestamp are kept.

use tracing::debug;

use crate::event::{Event, Payload, PvName};

/// Field names descended into, in order, to reach the payload.
const PAYLOAD_FIELDS: [&str; 2] = ["value", "data"];

const TIMESTAMP_FIELD: &str = "timeStamp";
const SECONDS_FIELD: &str = "secondsPastEpoch";
const NANOS_FIELD: &str = "nanoseconds";

/// One field of a [`Structure`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i64),
    Leaf(Payload),
    Struct(Structure),
}

/// Ordered set of named fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Structure {
    fields: Vec<(String, Field)>,
}

impl Structure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a field, builder style.
    pub fn with(mut self, name: impl Into<String>, field: Field) -> Self {
        self.insert(name, field);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, field: Field) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = field;
        } else {
            self.fields.push((name, field));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    fn take(&mut self, name: &str) -> Option<Field> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Normative scalar/array layout: `value` plus `timeStamp`.
    pub fn normative(value: Payload, seconds_past_epoch: i64, nanoseconds: i64) -> Self {
        Self::new().with("value", Field::Leaf(value)).with(
            TIMESTAMP_FIELD,
            Field::Struct(
                Self::new()
                    .with(SECONDS_FIELD, Field::Int(seconds_past_epoch))
                    .with(NANOS_FIELD, Field::Int(nanoseconds)),
            ),
        )
    }
}

/// Payload or timestamp could not be extracted from an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// A required field is absent.
    MissingField(&'static str),
    /// A field has an unexpected shape.
    WrongType(&'static str),
    /// Descending through `value`/`data` ended on a structure, not a leaf.
    NoLeaf,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::MissingField(name) => write!(f, "missing field '{}'", name),
            ExtractError::WrongType(name) => write!(f, "field '{}' has unexpected type", name),
            ExtractError::NoLeaf => write!(f, "no value leaf in envelope"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Reconstructs `secondsPastEpoch + nanoseconds / 1e9` from `timeStamp`.
pub fn extract_timestamp(envelope: &Structure) -> Result<f64, ExtractError> {
    let ts = match envelope.get(TIMESTAMP_FIELD) {
        Some(Field::Struct(ts)) => ts,
        Some(_) => return Err(ExtractError::WrongType(TIMESTAMP_FIELD)),
        None => return Err(ExtractError::MissingField(TIMESTAMP_FIELD)),
    };
    let int_field = |name: &'static str| match ts.get(name) {
        Some(Field::Int(v)) => Ok(*v),
        Some(_) => Err(ExtractError::WrongType(name)),
        None => Err(ExtractError::MissingField(name)),
    };
    let seconds = int_field(SECONDS_FIELD)?;
    let nanos = int_field(NANOS_FIELD)?;
    Ok(seconds as f64 + nanos as f64 / 1_000_000_000.0)
}

/// Unwraps the payload leaf, descending through `value` then `data`.
///
/// A field that is absent is skipped, so both `{value: leaf}` and
/// `{value: {data: leaf}}` resolve to `leaf`.
pub fn extract_payload(envelope: Structure) -> Result<Payload, ExtractError> {
    let mut current = Field::Struct(envelope);
    for name in PAYLOAD_FIELDS {
        let inner = match &mut current {
            Field::Struct(s) => s.take(name),
            _ => None,
        };
        if let Some(inner) = inner {
            current = inner;
        }
    }
    match current {
        Field::Leaf(payload) => Ok(payload),
        Field::Int(v) => Ok(Payload::Scalar(v as f64)),
        Field::Struct(_) => Err(ExtractError::NoLeaf),
    }
}

/// Turns an envelope into an [`Event`] for `pv`.
///
/// Extraction failures never drop the event: a missing timestamp becomes
/// `None` and an unreachable payload becomes [`Payload::Empty`].
pub fn normalize(pv: PvName, envelope: Structure, received_at: f64) -> Event {
    let timestamp = match extract_timestamp(&envelope) {
        Ok(ts) => Some(ts),
        Err(e) => {
            debug!(pv = %pv, error = %e, "envelope without usable timestamp");
            None
        }
    };
    let payload = extract_payload(envelope).unwrap_or_else(|e| {
        debug!(pv = %pv, error = %e, "envelope payload not extracted");
        Payload::Empty
    });
    Event::new(pv, payload, timestamp, received_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unwraps_value_and_rebuilds_timestamp() {
        let envelope = Structure::normative(Payload::I16Array(vec![1, 2, 3]), 100, 500_000_000);
        let event = normalize(PvName::from("CAM:ArrayData"), envelope, 42.0);

        assert_eq!(event.timestamp, Some(100.5));
        assert_eq!(*event.payload, Payload::I16Array(vec![1, 2, 3]));
        assert_eq!(event.size_bytes, 6);
        assert_eq!(event.received_at, 42.0);
        assert_eq!(&*event.pv, "CAM:ArrayData");
    }

    #[test]
    fn missing_timestamp_is_absent_not_an_error() {
        let envelope = Structure::new().with("value", Field::Leaf(Payload::Scalar(1.5)));
        let event = normalize(PvName::from("X"), envelope, 1.0);
        assert_eq!(event.timestamp, None);
        assert_eq!(*event.payload, Payload::Scalar(1.5));
    }

    #[test]
    fn partial_timestamp_is_absent() {
        let envelope = Structure::new()
            .with("value", Field::Leaf(Payload::Scalar(1.0)))
            .with(
                "timeStamp",
                Field::Struct(Structure::new().with("secondsPastEpoch", Field::Int(7))),
            );
        assert_eq!(
            extract_timestamp(&envelope),
            Err(ExtractError::MissingField("nanoseconds"))
        );
        assert_eq!(normalize(PvName::from("X"), envelope, 1.0).timestamp, None);
    }

    #[test]
    fn timestamp_with_wrong_type_is_rejected() {
        let envelope = Structure::new().with("timeStamp", Field::Int(5));
        assert_eq!(
            extract_timestamp(&envelope),
            Err(ExtractError::WrongType("timeStamp"))
        );
    }

    #[test]
    fn nested_value_data_is_unwrapped() {
        let envelope = Structure::new().with(
            "value",
            Field::Struct(Structure::new().with("data", Field::Leaf(Payload::Bytes(vec![9; 4])))),
        );
        assert_eq!(extract_payload(envelope), Ok(Payload::Bytes(vec![9; 4])));
    }

    #[test]
    fn data_field_alone_is_unwrapped() {
        let envelope = Structure::new().with("data", Field::Leaf(Payload::F64Array(vec![1.0])));
        assert_eq!(extract_payload(envelope), Ok(Payload::F64Array(vec![1.0])));
    }

    #[test]
    fn envelope_without_leaf_yields_empty_payload() {
        let envelope = Structure::new().with("alarm", Field::Int(0));
        assert_eq!(extract_payload(envelope.clone()), Err(ExtractError::NoLeaf));

        let event = normalize(PvName::from("X"), envelope, 1.0);
        assert_eq!(*event.payload, Payload::Empty);
        assert_eq!(event.size_bytes, 0);
    }

    #[test]
    fn integer_value_becomes_scalar() {
        let envelope = Structure::new().with("value", Field::Int(3));
        assert_eq!(extract_payload(envelope), Ok(Payload::Scalar(3.0)));
    }

    #[test]
    fn insert_replaces_existing_field() {
        let mut s = Structure::new().with("value", Field::Int(1));
        s.insert("value", Field::Int(2));
        assert_eq!(s.get("value"), Some(&Field::Int(2)));
    }
}
