//! Step - the opaque navigation intent routed through the engine

use std::fmt::Debug;

/// An opaque intent value routed through the coordination tree.
///
/// Every step type designates a sentinel "none" value meaning "no step":
/// the engine drops it silently at every ingestion point (initial seeding,
/// listener forwarding, adaptation results, contributor payloads). A step
/// carries no identity beyond equality of its payload.
pub trait Step: Clone + Debug + Send + Sync + 'static {
    /// The sentinel "no step" value.
    fn none() -> Self;

    /// Whether this is the sentinel.
    fn is_none(&self) -> bool;
}

/// `Option` is the natural carrier for step types without a dedicated
/// sentinel variant: `None` is the sentinel.
impl<T: Clone + Debug + Send + Sync + 'static> Step for Option<T> {
    fn none() -> Self {
        None
    }

    fn is_none(&self) -> bool {
        Option::is_none(self)
    }
}
