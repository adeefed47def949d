//! Traits for working with correlation identifiers on message headers.
//!
//! `CorrelatedHeader` abstracts over header types that carry the identifier
//! linking a response to its request or a notification to its live query,
//! so generic code can route inbound messages without matching on the
//! concrete header.

/// Access the correlation identifier carried by a header.
pub trait CorrelatedHeader {
    /// Return the correlation identifier. May be empty for headers that have
    /// not been validated by [`crate::classify`].
    fn correlation_id(&self) -> &str;

    /// Returns true if the header carries a non-empty identifier.
    fn has_correlation_id(&self) -> bool { !self.correlation_id().is_empty() }
}
