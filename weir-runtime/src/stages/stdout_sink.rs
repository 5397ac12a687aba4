//! A sink printing payload bytes to standard output.

use weir_core::payload::Payload;
use weir_core::stage::{SinkStage, Stage, StageContext, StageResult};

/// Writes each payload's bytes to stdout, lossily decoded as UTF-8.
pub struct StdoutSink;

impl Stage for StdoutSink {
    fn name(&self) -> &str {
        "stdout_sink"
    }
}

impl SinkStage for StdoutSink {
    fn consume(&mut self, _ctx: &StageContext, input: &Payload) -> StageResult<()> {
        println!("{}", String::from_utf8_lossy(input.bytes()));
        Ok(())
    }
}
