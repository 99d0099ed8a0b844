// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! `grasp acquire <url>`: acquire one resource and print or save it.

use crate::cli::output::{self, Styled};
use crate::cli::{build_engine, EngineOptions};
use crate::engine::PipelineError;
use crate::error::AcquireError;
use crate::extract::ContentKind;
use crate::types::{Acquired, AcquisitionRequest, Interaction, RenderHint};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct AcquireArgs {
    pub url: String,
    pub hint: RenderHint,
    /// JSON array of interaction commands, or `@path` to a file holding one.
    pub interactions: Option<String>,
    pub timeout_ms: Option<u64>,
    pub extract: Option<ContentKind>,
    /// Write the payload here instead of stdout.
    pub output: Option<PathBuf>,
    /// Directory for screenshots taken by `capture` steps.
    pub captures_dir: Option<PathBuf>,
}

pub async fn run(opts: &EngineOptions, args: AcquireArgs) -> Result<()> {
    let engine = build_engine(opts).await?;
    let interactions = match args.interactions.as_deref() {
        Some(raw) => parse_interactions(raw)?,
        None => Vec::new(),
    };
    let request = AcquisitionRequest::new(&args.url)?
        .with_timeout_ms(args.timeout_ms.unwrap_or(engine.config().default_timeout_ms))
        .with_interactions(interactions)?
        .with_hint(args.hint)?;

    let outcome = match args.extract {
        Some(kind) => engine
            .acquire_and_extract(request, kind)
            .await
            .map(|(acquired, content)| (acquired, Some(content))),
        None => engine
            .acquire(request)
            .await
            .map(|acquired| (acquired, None))
            .map_err(PipelineError::from),
    };
    engine.shutdown().await;

    let s = Styled::new();
    match outcome {
        Ok((acquired, content)) => {
            if output::is_json() {
                output::print_json(&serde_json::json!({
                    "ok": true,
                    "result": acquired,
                    "content": content,
                }));
            } else {
                match &content {
                    Some(content) => output::print_json(content),
                    None => emit_payload(&acquired, args.output.as_deref())?,
                }
                save_captures(&acquired, args.captures_dir.as_deref())?;
                if !output::is_quiet() {
                    eprintln!("  {} {}", s.ok_sym(), summary(&acquired));
                }
            }
            Ok(())
        }
        Err(PipelineError::Acquire(AcquireError::InteractionFailure {
            index,
            command,
            message,
            partial: Some(partial),
        })) if !output::is_json() => {
            emit_payload(&partial, args.output.as_deref())?;
            save_captures(&partial, args.captures_dir.as_deref())?;
            anyhow::bail!("interaction {index} ({command}) failed: {message}; partial content written")
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse an inline JSON array, or `@path` naming a file with one.
pub fn parse_interactions(raw: &str) -> Result<Vec<Interaction>> {
    let json = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read interactions file {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&json).context("interactions must be a JSON array of commands")
}

fn summary(acquired: &Acquired) -> String {
    format!(
        "{} via {} ({}, {}ms{})",
        acquired.final_url,
        acquired.mode.as_str(),
        output::format_bytes(acquired.byte_size),
        acquired.elapsed_ms,
        if acquired.from_cache { ", cached" } else { "" }
    )
}

fn emit_payload(acquired: &Acquired, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, &acquired.payload)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&acquired.payload)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn save_captures(acquired: &Acquired, dir: Option<&Path>) -> Result<()> {
    let Some(dir) = dir else {
        return Ok(());
    };
    if acquired.captures.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (i, png) in acquired.captures.iter().enumerate() {
        let path = dir.join(format!("capture-{i}.png"));
        std::fs::write(&path, png).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inline_interactions() {
        let steps = parse_interactions(
            r##"[{"type":"click","selector":"#more"},{"type":"wait","ms":500},{"type":"capture"}]"##,
        )
        .unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2], Interaction::Capture);
    }

    #[test]
    fn test_parse_interactions_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        std::fs::write(&path, r#"[{"type":"scroll","pixels":800}]"#).unwrap();
        let steps = parse_interactions(&format!("@{}", path.display())).unwrap();
        assert_eq!(steps, vec![Interaction::Scroll { pixels: 800 }]);
    }

    #[test]
    fn test_rejects_unknown_command() {
        assert!(parse_interactions(r#"[{"type":"eval","js":"1"}]"#).is_err());
    }
}
