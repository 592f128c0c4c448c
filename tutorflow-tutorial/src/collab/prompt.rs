use std::{collections::BTreeSet, fmt::Write, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{PromptBuilder, SourceFile};
use crate::error::{Result, TutorialError};

/// A core concept of the codebase; one chapter is written per abstraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstraction {
    pub name: String,
    pub description: String,
}

/// A directed link between two abstractions, by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: usize,
    pub to: usize,
    pub label: String,
}

/// Project summary and how its abstractions relate to each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAnalysis {
    pub summary: String,
    pub relationships: Vec<Relationship>,
}

/// `- Name: description`, with optional `*`/`**` emphasis around the name.
/// The name ends at the first colon followed by whitespace, so `Flow::run`
/// stays whole.
static ABSTRACTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]|\d+\.)\s+\**(.+?)\**\s*:\s+(.+?)\s*$").expect("valid regex")
});

static SUMMARY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\**summary\**\s*:\s*(.+?)\s*$").expect("valid regex"));

/// `- 0 -> 2: label`
static RELATIONSHIP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]\s*)?(\d+)\s*->\s*(\d+)\s*:\s*(.+?)\s*$").expect("valid regex")
});

/// `- 3`, optionally followed by `# name`.
static ORDER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*]\s*)?(\d+)\s*(?:#.*)?$").expect("valid regex"));

/// Extract abstractions from a model response.
///
/// Lines that are not list items are ignored. A response without any
/// list item is a parse error, so the calling node retries.
pub fn parse_abstractions(response: &str) -> Result<Vec<Abstraction>> {
    let abstractions: Vec<Abstraction> = response
        .lines()
        .filter_map(|line| ABSTRACTION_LINE.captures(line))
        .map(|caps| Abstraction {
            name: caps[1].trim().to_string(),
            description: caps[2].to_string(),
        })
        .collect();

    if abstractions.is_empty() {
        return Err(TutorialError::parse("no `- name: description` lines in response"));
    }
    Ok(abstractions)
}

fn index(raw: &str, count: usize) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(index) if index < count => Ok(index),
        _ => Err(TutorialError::parse(format!(
            "abstraction index {raw} out of range (0..{count})"
        ))),
    }
}

/// Extract the summary and relationships for `count` abstractions.
///
/// The summary line is required; every relationship must reference known
/// abstraction indices.
pub fn parse_relationships(response: &str, count: usize) -> Result<ProjectAnalysis> {
    let summary = response
        .lines()
        .find_map(|line| SUMMARY_LINE.captures(line))
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| TutorialError::parse("no `SUMMARY:` line in response"))?;

    let relationships = response
        .lines()
        .filter_map(|line| RELATIONSHIP_LINE.captures(line))
        .map(|caps| -> Result<Relationship> {
            Ok(Relationship {
                from: index(&caps[1], count)?,
                to: index(&caps[2], count)?,
                label: caps[3].to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ProjectAnalysis {
        summary,
        relationships,
    })
}

/// Extract a chapter order over `count` abstractions.
///
/// The result must name every index exactly once.
pub fn parse_chapter_order(response: &str, count: usize) -> Result<Vec<usize>> {
    let order = response
        .lines()
        .filter_map(|line| ORDER_LINE.captures(line))
        .map(|caps| index(&caps[1], count))
        .collect::<Result<Vec<_>>>()?;

    let distinct: BTreeSet<usize> = order.iter().copied().collect();
    if order.len() != count || distinct.len() != count {
        return Err(TutorialError::parse(format!(
            "chapter order {order:?} is not a permutation of 0..{count}"
        )));
    }
    Ok(order)
}

/// Minimal prompt templates.
#[derive(Debug, Clone)]
pub struct DefaultPrompts {
    /// Characters of each file quoted into the abstractions prompt.
    pub excerpt_chars: usize,
    pub max_abstractions: usize,
}

impl Default for DefaultPrompts {
    fn default() -> Self {
        Self {
            excerpt_chars: 4_000,
            max_abstractions: 10,
        }
    }
}

fn numbered(abstractions: &[Abstraction]) -> String {
    let mut list = String::new();
    for (index, abstraction) in abstractions.iter().enumerate() {
        let _ = writeln!(list, "{index}. {}: {}", abstraction.name, abstraction.description);
    }
    list
}

impl PromptBuilder for DefaultPrompts {
    fn abstractions_prompt(&self, project: &str, files: &[SourceFile], language: &str) -> String {
        let mut prompt = format!(
            "For the project `{project}`, identify the {max} most important abstractions \
             a newcomer must understand.\n\
             Answer in {language}, one per line, formatted exactly as \
             `- Name: one-sentence description`.\n\n\
             Codebase:\n",
            max = self.max_abstractions,
        );
        for file in files {
            let excerpt: String = file.content.chars().take(self.excerpt_chars).collect();
            let _ = write!(prompt, "--- File: {} ---\n{}\n\n", file.path, excerpt);
        }
        prompt
    }

    fn relationships_prompt(
        &self,
        project: &str,
        abstractions: &[Abstraction],
        language: &str,
    ) -> String {
        format!(
            "Analyze how the abstractions of `{project}` interact.\n\n\
             Abstractions:\n{list}\n\
             Answer in {language}. Start with one line `SUMMARY: <a short, beginner-friendly \
             summary of the project>`, then list each relationship on its own line as \
             `- <from index> -> <to index>: <short label>`. Every abstraction should \
             appear in at least one relationship.",
            list = numbered(abstractions),
        )
    }

    fn order_prompt(
        &self,
        project: &str,
        abstractions: &[Abstraction],
        analysis: &ProjectAnalysis,
    ) -> String {
        let mut links = String::new();
        for relationship in &analysis.relationships {
            let _ = writeln!(
                links,
                "- {} -> {}: {}",
                relationship.from, relationship.to, relationship.label
            );
        }
        format!(
            "Choose the best order to explain the abstractions of `{project}` in a tutorial, \
             foundational concepts first.\n\n\
             Summary: {summary}\n\n\
             Abstractions:\n{list}\n\
             Relationships:\n{links}\n\
             Answer with every index exactly once, one per line, as `- <index> # <name>`.",
            summary = analysis.summary,
            list = numbered(abstractions),
        )
    }

    fn chapter_prompt(
        &self,
        project: &str,
        abstraction: &Abstraction,
        chapter_number: usize,
        language: &str,
    ) -> String {
        format!(
            "Write chapter {chapter_number} of a beginner-friendly tutorial for `{project}` \
             in {language}.\n\
             The chapter covers \"{name}\": {description}\n\
             Use Markdown, start with a `# Chapter {chapter_number}: {name}` heading, \
             explain the motivation first and keep code snippets short.",
            name = abstraction.name,
            description = abstraction.description,
        )
    }
}
