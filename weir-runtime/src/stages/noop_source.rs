//! A source emitting a fixed number of numbered payloads.

use weir_core::payload::Payload;
use weir_core::stage::{SourceStage, Stage, StageConfig, StageContext, StageResult};

use super::config_u64;

/// Emits `count` payloads with bytes `msg-<i>`, then signals
/// end-of-stream. Useful for smoke tests and JOB-mode demos.
pub struct NoopSource {
    count: u64,
    produced: u64,
}

impl Default for NoopSource {
    fn default() -> Self {
        Self {
            count: 10,
            produced: 0,
        }
    }
}

impl Stage for NoopSource {
    fn name(&self) -> &str {
        "noop_source"
    }

    fn configure(&mut self, config: &StageConfig) -> StageResult<()> {
        if let Some(count) = config_u64(config, "count")? {
            self.count = count;
        }
        Ok(())
    }
}

impl SourceStage for NoopSource {
    fn produce(&mut self, _ctx: &StageContext) -> StageResult<Option<Payload>> {
        if self.produced >= self.count {
            return Ok(None);
        }
        let payload = Payload::new(format!("msg-{}", self.produced).into_bytes());
        self.produced += 1;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::StopToken;

    #[test]
    fn emits_count_then_ends() {
        let mut source = NoopSource::default();
        let mut config = StageConfig::new();
        config.insert("count".into(), serde_json::json!("2"));
        source.configure(&config).unwrap();

        let ctx = StageContext::new(StopToken::new());
        assert_eq!(
            source.produce(&ctx).unwrap().unwrap().bytes(),
            b"msg-0"
        );
        assert_eq!(
            source.produce(&ctx).unwrap().unwrap().bytes(),
            b"msg-1"
        );
        assert!(source.produce(&ctx).unwrap().is_none());
    }
}
