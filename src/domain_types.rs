//! Domain types for the AIPerf benchmark engine
//!
//! This module defines strongly-typed domain values to prevent primitive obsession
//! and improve type safety throughout the codebase.

use nutype::nutype;
use uuid::Uuid;

/// Unique identifier of a service instance on the message bus.
///
/// Every process on the bus (controller, managers, workers) carries one,
/// and every message it emits is stamped with it.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ServiceId(String);

impl ServiceId {
    /// Creates a new id of the form `<prefix>_<short-uuid>`.
    pub fn generate(prefix: &str) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self::try_new(format!("{prefix}_{}", &uuid[..8]))
            .unwrap_or_else(|_| Self::try_new(uuid).expect("uuid is non-empty"))
    }

    /// Returns the id with filesystem-hostile characters replaced, for use
    /// in artifact file names.
    pub fn sanitized(&self) -> String {
        self.as_ref()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            })
            .collect()
    }
}

/// Stable key of a conversation in the dataset.
#[nutype(
    validate(len_char_min = 1),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ConversationId(String);

/// Name of the model a request targets.
#[nutype(
    validate(len_char_min = 1, len_char_max = 512),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ModelName(String);

/// Number of concurrent in-flight credits maintained in concurrency mode.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 65_536),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1
)]
pub struct ConcurrencyLimit(usize);

impl ConcurrencyLimit {
    /// Gets the value as usize.
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Target request rate in requests per second.
#[nutype(
    validate(finite, greater = 0.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct RequestRate(f64);

impl RequestRate {
    /// Gets the value as f64.
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Probability, in percent (0-100), that an issued credit is marked for
/// forced cancellation. Values outside the range are rejected.
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 100.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0.0
)]
pub struct CancellationRate(f64);

impl CancellationRate {
    /// The rate as a 0.0-1.0 probability.
    pub fn as_probability(&self) -> f64 {
        self.into_inner() / 100.0
    }
}

/// Number of records buffered before the JSONL writer flushes to disk.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1000
)]
pub struct BatchSize(usize);

impl BatchSize {
    /// Gets the value as usize.
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_sanitizes_for_filenames() {
        let id = ServiceId::try_new("worker/0:a.b".to_string()).unwrap();
        assert_eq!(id.sanitized(), "worker_0_a_b");
    }

    #[test]
    fn generated_service_ids_are_unique() {
        let a = ServiceId::generate("worker");
        let b = ServiceId::generate("worker");
        assert_ne!(a, b);
        assert!(a.as_ref().starts_with("worker_"));
    }

    #[test]
    fn cancellation_rate_rejects_out_of_range() {
        assert!(CancellationRate::try_new(-0.1).is_err());
        assert!(CancellationRate::try_new(100.1).is_err());
        let half = CancellationRate::try_new(50.0).unwrap();
        assert!((half.as_probability() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn request_rate_rejects_non_positive() {
        assert!(RequestRate::try_new(0.0).is_err());
        assert!(RequestRate::try_new(f64::NAN).is_err());
        assert!(RequestRate::try_new(10.0).is_ok());
    }
}
