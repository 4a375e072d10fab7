//! Endpoint configuration.

/// Payloads larger than this are spilled out-of-line into anonymous shared
/// memory rather than carried inline in the datagram. Tuned well below the
/// kernel's typical per-datagram size cap.
pub const OOL_THRESHOLD: usize = 64 * 1024;

/// Tunables for an [`crate::Endpoint`].
///
/// Every field has a sensible default; callers needing different behavior
/// construct via [`EndpointConfig::new`] and the builder-style `with_*`
/// methods.
#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    incoming_capacity: usize,
    max_ool_payload: usize,
}

impl EndpointConfig {
    /// Default bound on the incoming-message queue.
    pub const DEFAULT_INCOMING_CAPACITY: usize = 64;

    /// Default maximum OOL payload size: 64 MiB.
    pub const DEFAULT_MAX_OOL_PAYLOAD: usize = 64 * 1024 * 1024;

    /// Builds a config with the recommended defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            incoming_capacity: Self::DEFAULT_INCOMING_CAPACITY,
            max_ool_payload: Self::DEFAULT_MAX_OOL_PAYLOAD,
        }
    }

    /// Sets the bound on the incoming-message queue.
    #[must_use]
    pub fn with_incoming_capacity(mut self, capacity: usize) -> Self {
        self.incoming_capacity = capacity;
        self
    }

    /// Sets the maximum OOL payload size. Sends exceeding this are
    /// rejected with `FpcError::PayloadTooLarge` before a shared-memory
    /// segment is created.
    #[must_use]
    pub fn with_max_ool_payload(mut self, max: usize) -> Self {
        self.max_ool_payload = max;
        self
    }

    /// The configured incoming-queue capacity.
    #[must_use]
    pub fn incoming_capacity(&self) -> usize {
        self.incoming_capacity
    }

    /// The configured OOL payload cap.
    #[must_use]
    pub fn max_ool_payload(&self) -> usize {
        self.max_ool_payload
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recommendations() {
        let config = EndpointConfig::new();
        assert_eq!(config.incoming_capacity(), 64);
        assert_eq!(config.max_ool_payload(), 64 * 1024 * 1024);
    }

    #[test]
    fn builder_overrides_take_effect() {
        let config = EndpointConfig::new().with_incoming_capacity(8).with_max_ool_payload(1024);
        assert_eq!(config.incoming_capacity(), 8);
        assert_eq!(config.max_ool_payload(), 1024);
    }
}
