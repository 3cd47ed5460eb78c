//! Normalized PV update events.
//!
//! Whatever backend delivered an update, metrics only ever see an [`Event`]:
//! the PV name, the unwrapped payload, the optional source timestamp and the
//! local receipt time.

use std::sync::Arc;

/// Process variable name. Cheap to clone, borrows as `&str` for map lookups.
pub type PvName = Arc<str>;

/// Builds a PV name list from plain strings.
pub fn pv_names<S: AsRef<str>>(names: &[S]) -> Vec<PvName> {
    names.iter().map(|n| PvName::from(n.as_ref())).collect()
}

/// Value carried by a PV update.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Nothing could be extracted from the delivery.
    Empty,
    Scalar(f64),
    Text(String),
    Bytes(Vec<u8>),
    I16Array(Vec<i16>),
    I32Array(Vec<i32>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
}

impl Payload {
    /// Raw byte length of array and byte payloads (element count * element width).
    ///
    /// Scalars, text and empty payloads have no byte length.
    pub fn nbytes(&self) -> Option<usize> {
        match self {
            Payload::Bytes(v) => Some(v.len()),
            Payload::I16Array(v) => Some(std::mem::size_of_val(v.as_slice())),
            Payload::I32Array(v) => Some(std::mem::size_of_val(v.as_slice())),
            Payload::F32Array(v) => Some(std::mem::size_of_val(v.as_slice())),
            Payload::F64Array(v) => Some(std::mem::size_of_val(v.as_slice())),
            Payload::Empty | Payload::Scalar(_) | Payload::Text(_) => None,
        }
    }

    /// Number of elements for sequence-like payloads.
    pub fn element_count(&self) -> Option<usize> {
        match self {
            Payload::Text(s) => Some(s.chars().count()),
            Payload::Bytes(v) => Some(v.len()),
            Payload::I16Array(v) => Some(v.len()),
            Payload::I32Array(v) => Some(v.len()),
            Payload::F32Array(v) => Some(v.len()),
            Payload::F64Array(v) => Some(v.len()),
            Payload::Empty | Payload::Scalar(_) => None,
        }
    }

    /// Size estimate used for data-volume counters.
    ///
    /// Byte length when known, otherwise 4 bytes per element, otherwise 0.
    pub fn size_bytes(&self) -> usize {
        self.nbytes()
            .or_else(|| self.element_count().map(|n| n * 4))
            .unwrap_or(0)
    }

    /// Synthetic processing load: mean of numeric arrays, sum of the first
    /// 100 bytes of byte payloads. The value itself carries no meaning.
    pub fn synthetic_load(&self) -> f64 {
        fn mean<T: Copy + Into<f64>>(values: &[T]) -> f64 {
            if values.is_empty() {
                return 0.0;
            }
            values.iter().map(|&v| v.into()).sum::<f64>() / values.len() as f64
        }

        match self {
            Payload::Bytes(v) => v.iter().take(100).map(|&b| f64::from(b)).sum(),
            Payload::I16Array(v) => mean(v),
            Payload::I32Array(v) => mean(v),
            Payload::F32Array(v) => mean(v),
            Payload::F64Array(v) => mean(v),
            Payload::Empty | Payload::Scalar(_) | Payload::Text(_) => 0.0,
        }
    }
}

/// One delivered update, immutable once built.
#[derive(Debug, Clone)]
pub struct Event {
    pub pv: PvName,
    /// Shared so fan-out to several observers never copies array data.
    pub payload: Arc<Payload>,
    /// Source timestamp reported by the backend, seconds since epoch.
    pub timestamp: Option<f64>,
    pub size_bytes: usize,
    /// Local wall-clock time at delivery, seconds since epoch.
    pub received_at: f64,
}

impl Event {
    pub fn new(pv: PvName, payload: Payload, timestamp: Option<f64>, received_at: f64) -> Self {
        let size_bytes = payload.size_bytes();
        Self {
            pv,
            payload: Arc::new(payload),
            timestamp,
            size_bytes,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nbytes_accounts_for_element_width() {
        assert_eq!(Payload::Bytes(vec![0; 10]).nbytes(), Some(10));
        assert_eq!(Payload::I16Array(vec![0; 10]).nbytes(), Some(20));
        assert_eq!(Payload::I32Array(vec![0; 10]).nbytes(), Some(40));
        assert_eq!(Payload::F32Array(vec![0.0; 10]).nbytes(), Some(40));
        assert_eq!(Payload::F64Array(vec![0.0; 10]).nbytes(), Some(80));
        assert_eq!(Payload::Scalar(1.0).nbytes(), None);
        assert_eq!(Payload::Text("abc".into()).nbytes(), None);
    }

    #[test]
    fn size_bytes_falls_back_to_four_bytes_per_element() {
        assert_eq!(Payload::Text("abcd".into()).size_bytes(), 16);
        assert_eq!(Payload::Scalar(3.0).size_bytes(), 0);
        assert_eq!(Payload::Empty.size_bytes(), 0);
        assert_eq!(Payload::I16Array(vec![1, 2, 3]).size_bytes(), 6);
    }

    #[test]
    fn synthetic_load_averages_arrays_and_sums_byte_prefix() {
        assert_eq!(Payload::F64Array(vec![1.0, 2.0, 3.0]).synthetic_load(), 2.0);
        assert_eq!(Payload::I16Array(Vec::new()).synthetic_load(), 0.0);
        assert_eq!(Payload::Bytes(vec![1; 150]).synthetic_load(), 100.0);
        assert_eq!(Payload::Scalar(7.0).synthetic_load(), 0.0);
    }

    #[test]
    fn event_computes_size_once() {
        let event = Event::new(PvName::from("A"), Payload::Bytes(vec![0; 64]), None, 1.0);
        assert_eq!(event.size_bytes, 64);
        assert_eq!(&*event.pv, "A");
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn pv_names_builds_shared_names() {
        let names = pv_names(&["a", "b"]);
        assert_eq!(names.len(), 2);
        assert_eq!(&*names[1], "b");
    }
}
