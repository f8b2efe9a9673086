// Copyright (c) 2024 Red Hat, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//

//! Rule-engine runner boundary.
//!
//! The engine that parses and executes policy rules is an external
//! collaborator. The evaluator only depends on the [`Runner`] trait;
//! [`CommandRunner`] adapts an engine binary on `$PATH`, tests inject
//! their own implementations.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::report::CheckResult;

/// Raw rule-engine output: one check result per input namespace plus an
/// opaque data document passed through to the report.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RunnerOutput {
    #[serde(default)]
    pub results: Vec<CheckResult>,

    #[serde(default)]
    pub data: Option<Value>,
}

#[async_trait]
pub trait Runner: Send + Sync {
    /// Execute the policy against `inputs`. Bucket membership and order
    /// are reported as-is; post-processing belongs to the evaluator.
    async fn run(&self, inputs: &[PathBuf]) -> Result<RunnerOutput>;
}

/// Invokes an external rule-engine binary and decodes the JSON document
/// it prints on stdout: `{"results": [...], "data": ...}`.
pub struct CommandRunner {
    program: PathBuf,
    policy_dirs: Vec<PathBuf>,
    capabilities_path: PathBuf,
}

impl CommandRunner {
    pub fn new(
        program: impl Into<PathBuf>,
        policy_dirs: Vec<PathBuf>,
        capabilities_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            policy_dirs,
            capabilities_path: capabilities_path.into(),
        }
    }
}

#[async_trait]
impl Runner for CommandRunner {
    async fn run(&self, inputs: &[PathBuf]) -> Result<RunnerOutput> {
        let mut command = Command::new(&self.program);
        command.arg("test");
        for dir in &self.policy_dirs {
            command.arg("--policy").arg(dir);
        }
        command
            .arg("--capabilities")
            .arg(&self.capabilities_path)
            .arg("--output")
            .arg("json");
        for input in inputs {
            command.arg(input);
        }

        debug!("running rule engine {}", self.program.display());
        let output = command
            .output()
            .await
            .with_context(|| format!("spawn rule engine {}", self.program.display()))?;

        // The engine exits non-zero when rules fail; that is still a
        // successful run as long as it produced a report.
        if output.stdout.is_empty() {
            bail!(
                "rule engine {} exited with {} and produced no report: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        serde_json::from_slice(&output.stdout).context("decode rule engine output")
    }
}
