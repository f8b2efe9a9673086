// Copyright (c) 2024 Red Hat, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//

//! Catalog of rule metadata collected from annotated policy modules.
//!
//! Policy modules carry machine-readable annotations as comment blocks:
//!
//! ```text
//! package a.b.c
//! # METADATA
//! # title: Title
//! # description: Description
//! # custom:
//! #   short_name: short
//! #   collections: [A, B, C]
//! #   effective_on: 2022-01-01T00:00:00Z
//! #   depends_on: a.b.c
//! deny[msg] {
//!     msg := "hi"
//! }
//! ```
//!
//! The block body is YAML. A rule is admitted to the catalog only when it
//! declares a `short_name`; its canonical code is
//! `<package>.<short_name>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use strum_macros::{Display, EnumString};

const METADATA_MARKER: &str = "METADATA";
const MODULE_EXTENSION: &str = "rego";

/// What a rule reports when it matches, derived from the rule head name.
#[derive(Clone, Copy, Debug, Default, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum RuleKind {
    Deny,
    Warn,
    Allow,
    #[default]
    Other,
}

/// Metadata record extracted from one annotated rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleInfo {
    /// Canonical `<package>.<short_name>` identifier.
    pub code: String,

    /// Package path of the declaring module.
    pub package: String,

    pub short_name: String,

    pub title: Option<String>,

    pub description: Option<String>,

    pub solution: Option<String>,

    /// Collection tags used for bulk include/exclude.
    pub collections: Vec<String>,

    /// Codes of rules this rule depends on.
    pub depends_on: Vec<String>,

    /// RFC 3339 timestamp from which the rule is enforced.
    pub effective_on: Option<String>,

    pub kind: RuleKind,
}

/// The annotation block body. Unknown keys are ignored so policy authors
/// can carry extra annotations without breaking the catalog.
#[derive(Debug, Deserialize)]
struct AnnotationBlock {
    title: Option<String>,
    description: Option<String>,
    #[serde(default)]
    custom: CustomAnnotations,
}

#[derive(Debug, Default, Deserialize)]
struct CustomAnnotations {
    short_name: Option<String>,
    solution: Option<String>,
    collections: Option<serde_yaml::Value>,
    depends_on: Option<serde_yaml::Value>,
    effective_on: Option<serde_yaml::Value>,
}

/// Catalog of rule descriptors keyed by canonical code. Built once per
/// evaluation and read-only afterwards.
#[derive(Debug, Default)]
pub struct PolicyRules(HashMap<String, RuleInfo>);

impl PolicyRules {
    pub fn get(&self, code: &str) -> Option<&RuleInfo> {
        self.0.get(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collect annotations from every policy module under `root`.
    /// Modules are visited in path order, so overlays placed later in the
    /// tree refine rules declared earlier.
    pub async fn collect_dir(&mut self, root: &Path) -> Result<()> {
        let mut pending = vec![root.to_path_buf()];
        let mut modules: Vec<PathBuf> = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("read policy directory {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if path
                    .extension()
                    .map_or(false, |extension| extension == MODULE_EXTENSION)
                {
                    modules.push(path);
                }
            }
        }

        modules.sort();
        for path in modules {
            let source = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("read policy module {}", path.display()))?;
            self.collect_module(&path.display().to_string(), &source)?;
        }

        debug!("indexed {} annotated rules under {}", self.len(), root.display());
        Ok(())
    }

    /// Collect the annotated rules of one module. A module that does not
    /// declare a package cannot be indexed at all; a malformed annotation
    /// block only skips the rule it belongs to.
    pub fn collect_module(&mut self, label: &str, source: &str) -> Result<()> {
        let lines: Vec<&str> = source.lines().collect();
        let package = module_package(label, &lines)?;

        let mut index = 0;
        while index < lines.len() {
            if !is_metadata_marker(lines[index]) {
                index += 1;
                continue;
            }

            let block_line = index + 1;
            let mut body = String::new();
            index += 1;
            while index < lines.len() {
                match comment_text(lines[index]) {
                    Some(text) => {
                        body.push_str(text);
                        body.push('\n');
                        index += 1;
                    }
                    None => break,
                }
            }

            let head = match lines.get(index).map(|line| head_name(line)) {
                Some(Some(head)) => head,
                _ => {
                    warn!("{label}:{block_line}: annotation block is not attached to a rule");
                    continue;
                }
            };

            let block: AnnotationBlock = match serde_yaml::from_str(&body) {
                Ok(block) => block,
                Err(e) => {
                    warn!("{label}:{block_line}: malformed annotation block: {e}");
                    continue;
                }
            };

            let Some(short_name) = block.custom.short_name.clone() else {
                continue;
            };

            let code = format!("{package}.{short_name}");
            let info = RuleInfo {
                code: code.clone(),
                package: package.clone(),
                short_name,
                title: block.title,
                description: block.description,
                solution: block.custom.solution,
                collections: yaml_string_list(block.custom.collections.as_ref(), &code, "collections"),
                depends_on: yaml_string_list(block.custom.depends_on.as_ref(), &code, "depends_on"),
                effective_on: yaml_string(block.custom.effective_on.as_ref(), &code, "effective_on"),
                kind: RuleKind::from_str(&head).unwrap_or(RuleKind::Other),
            };

            // Overlays refine upstream rules: the last descriptor wins.
            self.0.insert(code, info);
        }

        Ok(())
    }
}

/// The package path declared by the module. It must be the first
/// significant line; a module without one is not valid rule source.
fn module_package(label: &str, lines: &[&str]) -> Result<String> {
    for (number, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match trimmed.strip_prefix("package ") {
            Some(path) => {
                let path = path.split_whitespace().next().unwrap_or_default();
                if path.is_empty() {
                    bail!("{label}:{}: empty package declaration", number + 1);
                }
                return Ok(path.to_string());
            }
            None => bail!("{label}:{}: expected package declaration", number + 1),
        }
    }

    bail!("{label}: missing package declaration")
}

fn is_metadata_marker(line: &str) -> bool {
    match comment_text(line) {
        Some(text) => text.trim() == METADATA_MARKER,
        None => false,
    }
}

/// The body of a comment line, with the `#` and one leading space
/// removed. Returns `None` for anything that is not a comment.
fn comment_text(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('#')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// The leading identifier of a rule head, e.g. `deny` in
/// `deny[msg] { ... }` or `warn contains msg if { ... }`.
fn head_name(line: &str) -> Option<String> {
    let name: String = line
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Coerce an annotation value to a list of strings. Scalars become
/// singletons; entries of other types are dropped with a warning.
fn yaml_string_list(value: Option<&serde_yaml::Value>, code: &str, field: &str) -> Vec<String> {
    match value {
        None => Vec::new(),
        Some(serde_yaml::Value::String(s)) => vec![s.clone()],
        Some(serde_yaml::Value::Sequence(items)) => items
            .iter()
            .filter_map(|item| match item {
                serde_yaml::Value::String(s) => Some(s.clone()),
                other => {
                    warn!("rule {code}: dropping non-string {field} entry: {other:?}");
                    None
                }
            })
            .collect(),
        Some(other) => {
            warn!("rule {code}: ignoring {field} of unexpected type: {other:?}");
            Vec::new()
        }
    }
}

fn yaml_string(value: Option<&serde_yaml::Value>, code: &str, field: &str) -> Option<String> {
    match value {
        None => None,
        Some(serde_yaml::Value::String(s)) => Some(s.clone()),
        Some(other) => {
            warn!("rule {code}: ignoring {field} of unexpected type: {other:?}");
            None
        }
    }
}
