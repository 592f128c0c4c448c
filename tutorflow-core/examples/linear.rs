//! Linear flow with a conditional branch and a flaky step.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use tutorflow_core::prelude::*;

/// Parses `input` into a list of words.
struct Tokenize;

#[async_trait]
impl Node for Tokenize {
    type Prepared = String;
    type Output = Vec<String>;

    async fn prepare(&self, context: &Context) -> Result<String> {
        context.require("input")
    }

    async fn execute(&self, input: &String) -> Result<Vec<String>> {
        Ok(input.split_whitespace().map(str::to_string).collect())
    }

    async fn finalize(
        &self,
        context: &mut Context,
        _input: String,
        words: Vec<String>,
    ) -> Result<Option<Action>> {
        let label = if words.is_empty() { "empty" } else { "words" };
        context.set("words", &words)?;
        Ok(Some(Action::from(label)))
    }
}

/// Fails twice before succeeding, standing in for a remote service.
#[derive(Default)]
struct Summarize {
    calls: AtomicUsize,
}

#[async_trait]
impl Node for Summarize {
    type Prepared = Vec<String>;
    type Output = String;

    async fn prepare(&self, context: &Context) -> Result<Vec<String>> {
        context.require("words")
    }

    async fn execute(&self, words: &Vec<String>) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < 3 {
            println!("⚠️  summarize attempt {call} failed");
            return Err(FlowError::execution("service unavailable"));
        }
        Ok(format!("{} words, first is '{}'", words.len(), words[0]))
    }

    async fn finalize(
        &self,
        context: &mut Context,
        _words: Vec<String>,
        summary: String,
    ) -> Result<Option<Action>> {
        context.set("summary", summary)?;
        Ok(None)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(50))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("🚀 Linear flow example");

    let mut builder = Flow::builder();
    builder.name("linear");
    let tokenize = builder.node(Tokenize);
    let summarize = builder.node(Summarize::default());
    let empty = builder.node(helpers::set_value(
        "empty",
        "summary",
        serde_json::json!("nothing to summarize"),
    ));
    builder.on(tokenize, "words").then(summarize)?;
    builder.on(tokenize, "empty").then(empty)?;
    builder.start(tokenize);
    let flow = builder.build()?;

    for input in ["the quick brown fox", "   "] {
        let mut context = ContextBuilder::new().with("input", input)?.build();
        let report = flow.run_traced(&mut context).await?;

        println!("📄 input: {input:?}");
        for step in &report.trace {
            println!(
                "   step {} {} -> {} ({:?})",
                step.step_number, step.node_name, step.action, step.duration
            );
        }
        println!(
            "✅ summary: {}",
            context.get::<String>("summary")?.unwrap_or_default()
        );
    }

    Ok(())
}
