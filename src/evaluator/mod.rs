// Copyright (c) 2024 Red Hat, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//

//! Policy evaluation orchestrator.
//!
//! An [`Evaluator`] drives one evaluation: materialize the policy
//! sources into a working area, write the restricted rule-engine
//! capabilities, build the rule catalog, invoke the runner, and
//! post-process the raw check results into the canonical report.
//!
//! Post-processing never mutates the runner output; every surviving
//! result is a new value. Within each bucket the runner's order is
//! preserved. Dropping the future returned by [`Evaluator::evaluate`]
//! cancels the evaluation at the next collaborator await point.

pub mod capabilities;
mod matchers;
pub mod rules;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;

use crate::config::PolicyConfig;
use crate::report::{
    normalize_collections, CheckResult, Report, RuleResult, METADATA_DESCRIPTION,
    METADATA_EFFECTIVE_ON, METADATA_SOLUTION, METADATA_TITLE,
};
use crate::runner::{CommandRunner, Runner};
use crate::source::PolicySource;

use matchers::Criteria;
use rules::PolicyRules;

pub type EvaluatorResult<T> = std::result::Result<T, EvaluatorError>;

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("Failed to initialize work dir: {source}")]
    InitializeWorkDir {
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid capabilities document: {source}")]
    InvalidCapabilities {
        #[source]
        source: anyhow::Error,
    },

    #[error("No runner or rule engine command configured")]
    MissingRunner,

    #[error("Failed to fetch policy from {url}: {source}")]
    PolicyFetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to build rule catalog: {source}")]
    RuleCatalog {
        #[source]
        source: anyhow::Error,
    },

    #[error("Rule engine execution failed: {source}")]
    RunnerFailed {
        #[source]
        source: anyhow::Error,
    },

    #[error("no successes, warnings, or failures, check input")]
    EmptyResults,
}

/// The working area of one evaluation. A scoped dir is removed when the
/// evaluator is dropped, on every exit path; a pinned dir belongs to the
/// caller.
enum WorkDir {
    Scoped(TempDir),
    Pinned(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Scoped(dir) => dir.path(),
            WorkDir::Pinned(path) => path,
        }
    }
}

enum RunnerChoice {
    Injected(Box<dyn Runner>),
    Engine(PathBuf),
}

#[derive(Default)]
pub struct EvaluatorBuilder {
    sources: Vec<Box<dyn PolicySource>>,
    runner: Option<Box<dyn Runner>>,
    engine_command: Option<PathBuf>,
    config: PolicyConfig,
    effective_time: Option<DateTime<Utc>>,
    work_dir: Option<PathBuf>,
    capabilities: Option<String>,
}

impl EvaluatorBuilder {
    pub fn policy_source(mut self, source: Box<dyn PolicySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Inject a runner instead of spawning a rule engine binary.
    pub fn runner(mut self, runner: Box<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Rule engine binary to execute when no runner is injected.
    pub fn engine_command(mut self, program: impl Into<PathBuf>) -> Self {
        self.engine_command = Some(program.into());
        self
    }

    pub fn config(mut self, config: PolicyConfig) -> Self {
        self.config = config;
        self
    }

    /// Pin the instant `effective_on` is judged against. Defaults to the
    /// wall clock at evaluation entry.
    pub fn effective_time(mut self, at: DateTime<Utc>) -> Self {
        self.effective_time = Some(at);
        self
    }

    /// Pin the working area instead of using a scoped temporary dir.
    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(path.into());
        self
    }

    /// Replace the stock rule-engine capability document the restriction
    /// is derived from.
    pub fn capabilities(mut self, document: impl Into<String>) -> Self {
        self.capabilities = Some(document.into());
        self
    }

    pub async fn build(self) -> EvaluatorResult<Evaluator> {
        let runner = match (self.runner, self.engine_command) {
            (Some(runner), _) => RunnerChoice::Injected(runner),
            (None, Some(program)) => RunnerChoice::Engine(program),
            (None, None) => return Err(EvaluatorError::MissingRunner),
        };

        let work_dir = match self.work_dir {
            Some(path) => {
                tokio::fs::create_dir_all(&path)
                    .await
                    .map_err(|e| EvaluatorError::InitializeWorkDir { source: e.into() })?;
                WorkDir::Pinned(path)
            }
            None => WorkDir::Scoped(
                TempDir::new()
                    .map_err(|e| EvaluatorError::InitializeWorkDir { source: e.into() })?,
            ),
        };

        let document = capabilities::strict_capabilities(self.capabilities.as_deref())
            .map_err(|source| EvaluatorError::InvalidCapabilities { source })?;
        let capabilities_path = work_dir.path().join(capabilities::CAPABILITIES_FILENAME);
        tokio::fs::write(&capabilities_path, document)
            .await
            .map_err(|e| EvaluatorError::InitializeWorkDir { source: e.into() })?;

        Ok(Evaluator {
            sources: self.sources,
            runner,
            config: self.config,
            effective_time: self.effective_time,
            work_dir,
            capabilities_path,
        })
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator").finish_non_exhaustive()
    }
}

pub struct Evaluator {
    sources: Vec<Box<dyn PolicySource>>,
    runner: RunnerChoice,
    config: PolicyConfig,
    effective_time: Option<DateTime<Utc>>,
    work_dir: WorkDir,
    capabilities_path: PathBuf,
}

impl Evaluator {
    pub fn builder() -> EvaluatorBuilder {
        EvaluatorBuilder::default()
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Where the restricted capability document was written.
    pub fn capabilities_path(&self) -> &Path {
        &self.capabilities_path
    }

    /// Evaluate the policy against `inputs` and post-process the raw
    /// check results into the canonical report.
    pub async fn evaluate(&self, inputs: &[PathBuf]) -> EvaluatorResult<Report> {
        let at = self.effective_time.unwrap_or_else(Utc::now);

        let mut policy_dirs = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let dir = source
                .get_policy(self.work_dir.path(), false)
                .await
                .map_err(|source_err| EvaluatorError::PolicyFetch {
                    url: source.policy_url(),
                    source: source_err,
                })?;
            policy_dirs.push(dir);
        }

        let mut rules = PolicyRules::default();
        for dir in &policy_dirs {
            rules
                .collect_dir(dir)
                .await
                .map_err(|source| EvaluatorError::RuleCatalog { source })?;
        }

        let output = match &self.runner {
            RunnerChoice::Injected(runner) => runner.run(inputs).await,
            RunnerChoice::Engine(program) => {
                CommandRunner::new(program.clone(), policy_dirs, self.capabilities_path.clone())
                    .run(inputs)
                    .await
            }
        }
        .map_err(|source| EvaluatorError::RunnerFailed { source })?;

        if output.results.iter().all(CheckResult::is_empty) {
            return Err(EvaluatorError::EmptyResults);
        }

        let criteria = Criteria::new(&self.config);
        let results = output
            .results
            .iter()
            .map(|check| process_check(check, &rules, &criteria, at))
            .collect();

        let mut report = Report {
            results,
            data: output.data,
        };
        report.trim();

        debug!(
            "evaluated {} inputs across {} check results",
            inputs.len(),
            report.results.len()
        );
        Ok(report)
    }
}

/// Run one raw check result through the pipeline: include/exclude
/// filtering, the time gate for failures, then metadata enrichment.
/// Surviving warnings keep their position; demoted failures append after
/// them in their original relative order.
fn process_check(
    check: &CheckResult,
    rules: &PolicyRules,
    criteria: &Criteria,
    at: DateTime<Utc>,
) -> CheckResult {
    let mut out = CheckResult {
        name: check.name.clone(),
        ..Default::default()
    };

    for warning in &check.warnings {
        if let Some(mut warning) = filtered(warning, criteria) {
            enrich(&mut warning, rules, at);
            out.warnings.push(warning);
        }
    }

    for failure in &check.failures {
        let Some(mut failure) = filtered(failure, criteria) else {
            continue;
        };
        let effective = is_effective(&failure, at);
        enrich(&mut failure, rules, at);
        if effective {
            out.failures.push(failure);
        } else {
            out.warnings.push(failure);
        }
    }

    for success in &check.successes {
        if let Some(mut success) = filtered(success, criteria) {
            enrich(&mut success, rules, at);
            out.successes.push(success);
        }
    }

    // Skipped results and exceptions are not subject to include/exclude;
    // they still get normalized metadata.
    for skipped in &check.skipped {
        let mut skipped = skipped.clone();
        normalize_collections(&mut skipped.metadata);
        enrich(&mut skipped, rules, at);
        out.skipped.push(skipped);
    }
    for exception in &check.exceptions {
        let mut exception = exception.clone();
        normalize_collections(&mut exception.metadata);
        enrich(&mut exception, rules, at);
        out.exceptions.push(exception);
    }

    out
}

/// A normalized copy of the result, or `None` when the include/exclude
/// configuration drops it.
fn filtered(result: &RuleResult, criteria: &Criteria) -> Option<RuleResult> {
    let mut result = result.clone();
    normalize_collections(&mut result.metadata);
    criteria.includes(&result).then_some(result)
}

/// A failure is in force unless its `effective_on` is in the future.
/// Values that are missing, not strings, or not RFC 3339 never postpone
/// a failure.
fn is_effective(result: &RuleResult, at: DateTime<Utc>) -> bool {
    match result.metadata.get(METADATA_EFFECTIVE_ON) {
        None => true,
        Some(Value::String(raw)) => match DateTime::parse_from_rfc3339(raw) {
            Ok(effective) => effective.with_timezone(&Utc) <= at,
            Err(e) => {
                warn!("unparseable effective_on value {raw:?}: {e}");
                true
            }
        },
        Some(other) => {
            warn!("ignoring effective_on of unexpected type: {other}");
            true
        }
    }
}

/// Fill descriptive metadata from the rule catalog. Results without a
/// matching descriptor are left untouched. An `effective_on` timestamp
/// that has already passed is no longer actionable and is removed.
fn enrich(result: &mut RuleResult, rules: &PolicyRules, at: DateTime<Utc>) {
    let Some(code) = result.code().map(str::to_string) else {
        return;
    };
    let Some(info) = rules.get(&code) else {
        return;
    };

    let metadata = &mut result.metadata;
    for (key, value) in [
        (METADATA_TITLE, &info.title),
        (METADATA_DESCRIPTION, &info.description),
        (METADATA_SOLUTION, &info.solution),
    ] {
        if let Some(value) = value {
            if !metadata.contains_key(key) {
                metadata.insert(key.to_string(), Value::String(value.clone()));
            }
        }
    }

    if let Some(effective_on) = &info.effective_on {
        if !metadata.contains_key(METADATA_EFFECTIVE_ON) {
            metadata.insert(
                METADATA_EFFECTIVE_ON.to_string(),
                Value::String(effective_on.clone()),
            );
        }
    }

    let stale = metadata
        .get(METADATA_EFFECTIVE_ON)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map_or(false, |effective| effective.with_timezone(&Utc) <= at);
    if stale {
        metadata.remove(METADATA_EFFECTIVE_ON);
    }
}
