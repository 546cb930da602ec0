use crate::forwarder::UpstreamsForwarder;

/// Drains every transport owned by the router's forwarders.
///
/// The host registers [`Shutdown::trigger`] as its shutdown hook. Stopping a
/// transport is idempotent, so triggering more than once is harmless.
#[derive(Default)]
pub struct Shutdown {
    forwarders: Vec<UpstreamsForwarder>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, forwarder: UpstreamsForwarder) {
        self.forwarders.push(forwarder);
    }

    pub fn trigger(&self) {
        tracing::info!(forwarders = self.forwarders.len(), "Draining transports");

        for forwarder in &self.forwarders {
            forwarder.stop();
        }
    }
}
