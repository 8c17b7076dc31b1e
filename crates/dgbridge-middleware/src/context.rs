use std::sync::Arc;

use crate::registry::ConversionRegistry;
use crate::transport::Transport;

/// Everything a binding registry needs from the outside: where to publish
/// and how to convert.  Passed explicitly to every registry that needs it.
#[derive(Clone)]
pub struct BridgeContext {
    pub transport: Arc<dyn Transport>,
    pub registry: Arc<ConversionRegistry>,
}

impl BridgeContext {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<ConversionRegistry>) -> Self {
        Self {
            transport,
            registry,
        }
    }

    /// Context with the standard conversion pairs.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, Arc::new(ConversionRegistry::standard()))
    }
}
