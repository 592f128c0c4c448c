//! Optional file log of every prompt and response.
//!
//! Reasoning calls are traced under the `llm` target. The layer built here
//! appends those events to `llm_calls_YYYYMMDD.log` in a chosen directory,
//! independent of the console filter.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{Local, NaiveDate};
use tracing::{Level, Subscriber};
use tracing_subscriber::{Layer, filter::Targets, fmt, registry::LookupSpan};

use crate::error::Result;

/// Target of the prompt and response events.
pub const LLM_TARGET: &str = "llm";

pub fn llm_log_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("llm_calls_{}.log", date.format("%Y%m%d")))
}

/// Open today's log file in `dir` and return a layer writing `llm` events to it.
pub fn llm_log_layer<S>(dir: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(dir)?;
    let path = llm_log_path(dir, Local::now().date_naive());
    let file: File = OpenOptions::new().create(true).append(true).open(&path)?;

    Ok(fmt::layer()
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_filter(Targets::new().with_target(LLM_TARGET, Level::INFO)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tracing::{info, warn};
    use tracing_subscriber::{Registry, layer::SubscriberExt};

    use super::*;

    #[test]
    fn file_name_carries_the_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(
            llm_log_path(Path::new("logs"), date),
            PathBuf::from("logs/llm_calls_20240307.log")
        );
    }

    #[test]
    fn only_llm_events_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let layer = llm_log_layer::<Registry>(&logs).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            info!(target: "llm", prompt = "explain Flow", "PROMPT");
            warn!(target: "tutorflow", "unrelated");
        });

        let written =
            fs::read_to_string(llm_log_path(&logs, Local::now().date_naive())).unwrap();
        assert!(written.contains("PROMPT"), "{written}");
        assert!(written.contains("explain Flow"), "{written}");
        assert!(!written.contains("unrelated"), "{written}");
    }
}
