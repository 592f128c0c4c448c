//! Batch node fan-out: one "chapter" per topic, written concurrently.

use std::time::Duration;

use tutorflow_core::prelude::*;

struct WriteChapter;

#[async_trait]
impl BatchNode for WriteChapter {
    type Item = (usize, String);
    type Output = String;

    async fn prepare(&self, context: &Context) -> Result<Vec<(usize, String)>> {
        let topics: Vec<String> = context.require("topics")?;
        Ok(topics.into_iter().enumerate().collect())
    }

    async fn execute(&self, item: &(usize, String)) -> Result<String> {
        let (index, topic) = item;
        // Later chapters finish first.
        tokio::time::sleep(Duration::from_millis(100 / (*index as u64 + 1))).await;
        if topic == "flaky" {
            return Err(FlowError::execution("writer timed out"));
        }
        Ok(format!("# Chapter {}: {topic}", index + 1))
    }

    async fn execute_fallback(&self, item: &(usize, String), error: FlowError) -> Result<String> {
        let (index, topic) = item;
        println!("⚠️  chapter {} fell back: {error}", index + 1);
        Ok(format!("# Chapter {}: {topic} (unavailable)", index + 1))
    }

    async fn finalize(
        &self,
        context: &mut Context,
        _items: Vec<(usize, String)>,
        chapters: Vec<String>,
    ) -> Result<Option<Action>> {
        context.set("chapters", chapters)?;
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("📚 Batch chapters example");

    let mut builder = Flow::builder();
    let write = builder.step(
        Batched::new(WriteChapter)
            .with_retry(RetryPolicy::new(2, Duration::from_millis(10)))
            .with_concurrency(4),
    );
    builder.start(write);
    let flow = builder.build()?;

    let mut context = ContextBuilder::new()
        .with("topics", ["Flow", "Node", "flaky", "Cache"])?
        .build();
    flow.run(&mut context).await?;

    for chapter in context.get::<Vec<String>>("chapters")?.unwrap_or_default() {
        println!("{chapter}");
    }

    Ok(())
}
