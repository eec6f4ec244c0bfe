//! Rendering and saving generated prompts.
//!
//! Three renderings of a [`BatchSummary`]:
//!
//! * [`render_markdown`]: a readable report, one section per file;
//! * [`render_prompts`]: one prompt of a chosen kind per line, ready to be
//!   piped into a clipboard tool or another generator;
//! * [`render_json`]: the full summary as pretty JSON.

use crate::error::Img2PromptError;
use crate::output::{BatchSummary, FileResult, PromptKind, PromptRecord};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// Markdown report of a finished run.
pub fn render_markdown(summary: &BatchSummary) -> String {
    let mut md = String::from("# Generated prompts\n");

    for result in &summary.results {
        let _ = write!(md, "\n## {}\n", result.file_name);
        if result.prompts.is_empty() {
            md.push_str("\n_No prompts generated._\n");
            continue;
        }
        for record in &result.prompts {
            push_record(&mut md, record);
        }
    }

    if !summary.failed.is_empty() {
        md.push_str("\n## Failed files\n\n");
        for failed in &summary.failed {
            let _ = writeln!(md, "- {}", failed.error);
        }
    }

    if !summary.notices.is_empty() {
        md.push_str("\n## Notices\n\n");
        for notice in &summary.notices {
            let _ = writeln!(md, "- {notice}");
        }
    }

    let _ = write!(
        md,
        "\n---\n\n{} prompt set(s) · {} tokens · estimated cost ${:.4}\n",
        summary.prompt_count(),
        summary.usage.tokens,
        summary.usage.estimated_cost
    );
    md
}

fn push_record(md: &mut String, record: &PromptRecord) {
    let p = &record.prompts;
    let _ = write!(
        md,
        "\n### Image {} ({}, confidence {:.2})\n\n",
        record.source.index + 1,
        record.analysis.image_type,
        record.analysis.confidence
    );
    let _ = write!(md, "**Image prompt**\n\n{}\n\n", p.image_prompt);
    let _ = write!(md, "**Video prompt**\n\n{}\n\n", p.video_prompt);
    let _ = write!(md, "**Creative prompt**\n\n{}\n\n", p.creative_prompt);
    if !p.tags.is_empty() {
        let _ = writeln!(md, "- Tags: {}", p.tags.join(", "));
    }
    let _ = writeln!(md, "- Style: {}", p.style);
    let _ = writeln!(md, "- Mood: {}", p.mood);
    if let Some(colors) = p.colors.as_ref().filter(|c| !c.is_empty()) {
        let _ = writeln!(md, "- Colors: {}", colors.join(", "));
    }
    if let Some(lighting) = &p.lighting {
        let _ = writeln!(md, "- Lighting: {lighting}");
    }
    if let Some(composition) = &p.composition {
        let _ = writeln!(md, "- Composition: {composition}");
    }
}

/// One `kind` prompt per line, in result order.
///
/// Newlines inside a prompt are folded to spaces so each line is exactly one
/// prompt.
pub fn render_prompts(results: &[FileResult], kind: PromptKind) -> String {
    results
        .iter()
        .flat_map(|r| r.prompts.iter())
        .map(|record| {
            let mut line = record
                .prompt(kind)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            line.push('\n');
            line
        })
        .collect()
}

/// The whole summary as pretty-printed JSON.
pub fn render_json(summary: &BatchSummary) -> Result<String, Img2PromptError> {
    serde_json::to_string_pretty(summary)
        .map_err(|e| Img2PromptError::Internal(format!("JSON serialisation failed: {e}")))
}

/// Write `contents` to `path` via a temp file and rename, so a crash never
/// leaves a half-written export behind.
pub async fn write_atomic(path: impl AsRef<Path>, contents: &str) -> Result<(), Img2PromptError> {
    let path = path.as_ref();
    let write_err = |e| Img2PromptError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}
