//! Guarded-operation outcome type
//!
//! Collection operations never throw for storage trouble. They return an
//! `Outcome` that callers pattern-match: `Ok` is the normal path, `Recovered`
//! means the collection was rebuilt mid-operation and the value is a safe
//! default, `Degraded` means even recovery failed and the collection is
//! out of service until the next open.

/// Result of a guarded collection operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Recovered(T),
    Degraded,
}

impl<T> Outcome<T> {
    /// The carried value, if the collection produced one.
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Ok(v) | Outcome::Recovered(v) => Some(v),
            Outcome::Degraded => None,
        }
    }

    /// The carried value, or `default` when degraded.
    pub fn unwrap_or(self, default: T) -> T {
        self.value().unwrap_or(default)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Recovered(v) => Outcome::Recovered(f(v)),
            Outcome::Degraded => Outcome::Degraded,
        }
    }
}
