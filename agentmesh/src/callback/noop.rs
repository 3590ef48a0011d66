//! A hook implementation that does nothing.

use super::hooks::Callbacks;

/// A [`Callbacks`] implementation with every hook left at its no-op
/// default. Useful as a placeholder in configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}
