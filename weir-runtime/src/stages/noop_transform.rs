//! A transform that forwards payloads unchanged.

use weir_core::payload::Payload;
use weir_core::stage::{Stage, StageContext, StageResult, TransformStage};

/// Passes each input through untouched. The clone shares the byte buffer;
/// no copy is made.
pub struct NoopTransform;

impl Stage for NoopTransform {
    fn name(&self) -> &str {
        "noop_transform"
    }
}

impl TransformStage for NoopTransform {
    fn process(&mut self, _ctx: &StageContext, input: &Payload) -> StageResult<Payload> {
        Ok(input.clone())
    }
}
