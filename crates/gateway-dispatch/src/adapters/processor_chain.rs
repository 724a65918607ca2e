//! Sequential processor chain.

use crate::domain::context::{ExecutionContext, ExecutionPhase};
use crate::domain::error::DispatchResult;
use crate::ports::outbound::{Processor, ProcessorChain};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// Runs its processors in order and stops at the first error
pub struct SequentialProcessorChain {
    id: String,
    processors: Vec<Arc<dyn Processor>>,
}

impl SequentialProcessorChain {
    pub fn new(id: impl Into<String>, processors: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            id: id.into(),
            processors,
        }
    }

    /// Chain completing immediately
    pub fn empty(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[async_trait]
impl ProcessorChain for SequentialProcessorChain {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, context: &ExecutionContext, phase: ExecutionPhase) -> DispatchResult {
        for processor in &self.processors {
            trace!(chain = %self.id, processor = processor.id(), %phase, "Executing processor");
            if let Err(error) = processor.execute(context).await {
                debug!(
                    chain = %self.id,
                    processor = processor.id(),
                    %phase,
                    error = %error,
                    "Processor chain interrupted"
                );
                return Err(error);
            }
        }
        Ok(())
    }
}
