// Sample source trait - where raw battery text comes from
use async_trait::async_trait;

#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Produce one raw text blob. Blocks the calling task, not the runtime.
    async fn fetch(&self) -> anyhow::Result<String>;

    /// Short human-readable name for logs
    fn describe(&self) -> String;
}
