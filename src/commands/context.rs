//! Execution context handed to every command.

use std::sync::Arc;

use crate::cache::ResolutionCache;
use crate::client::BridgeClient;
use crate::feedback::Feedback;
use crate::navigation::Navigator;

/// Capabilities a command may use.
///
/// Commands keep no state of their own; everything they touch comes in
/// through this bundle.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Status messages for the user.
    pub feedback: Arc<dyn Feedback>,

    /// Requests to the bridge.
    pub client: BridgeClient,

    /// Instance URLs and opening them.
    pub navigator: Navigator,

    /// Table name resolution.
    pub tables: ResolutionCache,

    /// Remote update-set source resolution.
    pub sources: ResolutionCache,
}

impl ExecutionContext {
    pub fn new(
        feedback: Arc<dyn Feedback>,
        client: BridgeClient,
        navigator: Navigator,
        tables: ResolutionCache,
        sources: ResolutionCache,
    ) -> Self {
        Self {
            feedback,
            client,
            navigator,
            tables,
            sources,
        }
    }
}
