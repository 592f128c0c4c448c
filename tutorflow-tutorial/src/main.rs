use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use eyre::WrapErr;
use tracing::info;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};
use tutorflow_cache::ResultCache;
use tutorflow_tutorial::{
    Collaborators, TutorialConfig,
    collab::{
        CachedReasoner, DefaultPrompts, FsEmitter, HttpReasoningClient, LlmSettings,
        LocalDirFetcher,
    },
    config::keys,
    create_tutorial_flow, logging,
};

#[derive(Parser)]
#[command(
    name = "tutorflow",
    version,
    about = "Generate a tutorial for a local codebase"
)]
struct Cli {
    /// Path to the local directory
    #[arg(long)]
    dir: PathBuf,

    /// Project name (derived from the directory if omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Base directory for output
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Include file patterns, added to the defaults
    #[arg(short, long, num_args = 1..)]
    include: Vec<String>,

    /// Exclude file patterns, added to the defaults
    #[arg(short, long, num_args = 1..)]
    exclude: Vec<String>,

    /// Maximum file size in bytes
    #[arg(short = 's', long = "max-size", default_value_t = 100_000)]
    max_size: u64,

    /// Attempts per reasoning call
    #[arg(short = 'r', long, default_value_t = 3)]
    max_retries: usize,

    /// Seconds to wait between attempts
    #[arg(short, long, default_value_t = 10)]
    wait: u64,

    /// Language of the generated tutorial
    #[arg(long, default_value = "english")]
    language: String,

    /// Chapters written at the same time
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Always call the reasoning service
    #[arg(long)]
    no_cache: bool,

    /// Result cache file
    #[arg(long, default_value = "llm_cache.json")]
    cache_file: PathBuf,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "LLM_API_BASE", default_value = "https://api.openai.com/v1")]
    api_base: String,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Also append prompts and responses to a dated file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> TutorialConfig {
        TutorialConfig {
            project_name: self.name.clone(),
            output_dir: self.output.clone(),
            max_file_size: self.max_size,
            max_retries: self.max_retries,
            wait_secs: self.wait,
            language: self.language.clone(),
            use_cache: !self.no_cache,
            concurrency: self.concurrency,
            ..TutorialConfig::new(&self.dir)
        }
        .include(self.include.iter().cloned())
        .exclude(self.exclude.iter().cloned())
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tutorflow=info,llm=warn,warn"));
    let llm_file = cli
        .log_dir
        .as_deref()
        .map(logging::llm_log_layer::<Registry>)
        .transpose()
        .wrap_err("failed to open the llm call log")?;
    tracing_subscriber::registry()
        .with(llm_file)
        .with(fmt::layer().with_target(false).with_filter(console_filter))
        .init();
    let config = cli.config();

    info!(
        dir = %config.local_dir.display(),
        language = %config.language,
        "starting tutorial generation"
    );

    let client = HttpReasoningClient::new(LlmSettings {
        api_base: cli.api_base.clone(),
        api_key: cli.api_key.clone(),
        model: cli.model.clone(),
        ..LlmSettings::default()
    })
    .wrap_err("failed to build HTTP client")?;
    let cache = ResultCache::open(&cli.cache_file).await;

    let collaborators = Collaborators {
        fetcher: Arc::new(LocalDirFetcher),
        prompts: Arc::new(DefaultPrompts::default()),
        reasoner: Arc::new(CachedReasoner::new(Arc::new(client), Arc::new(cache))),
        emitter: Arc::new(FsEmitter),
    };

    let flow = create_tutorial_flow(&config, collaborators)?;
    let mut context = config.to_context()?;
    let report = flow
        .run_traced(&mut context)
        .await
        .wrap_err("tutorial generation failed")?;

    let output: Option<PathBuf> = context.get(keys::FINAL_OUTPUT_DIR)?;
    info!(
        run_id = %report.run_id,
        steps = report.steps,
        duration_ms = report.duration.as_millis() as u64,
        "done"
    );
    if let Some(dir) = output {
        println!("Tutorial written to {}", dir.display());
    }
    Ok(())
}
