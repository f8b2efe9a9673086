// Copyright (c) 2024 Red Hat, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//

//! Policy source collaborators.
//!
//! Fetching policy from git repositories or OCI bundles happens outside
//! this crate; the evaluator only requires that a source can materialize
//! a tree of rule source files into its working area.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;

/// A fetchable collection of policy rule source files.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Materialize the policy under `dest`. The returned directory holds
    /// the rule source tree, readable by the runner.
    async fn get_policy(&self, dest: &Path, verbose: bool) -> Result<PathBuf>;

    /// Where the policy comes from, for diagnostics.
    fn policy_url(&self) -> String;

    /// Relative subdirectory holding rule source inside the work area.
    fn subdir(&self) -> &str;
}

/// Policy rules already present on the local filesystem. The tree is
/// copied into the working area so an evaluation never reads (or races
/// with writers of) the original location.
#[derive(Clone, Debug)]
pub struct PolicyPath {
    path: PathBuf,
}

impl PolicyPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicySource for PolicyPath {
    async fn get_policy(&self, dest: &Path, verbose: bool) -> Result<PathBuf> {
        if !self.path.is_dir() {
            bail!("policy path {} is not a directory", self.path.display());
        }

        let target = dest.join(self.subdir());
        copy_tree(&self.path, &target).await?;

        if verbose {
            debug!(
                "materialized policy from {} into {}",
                self.path.display(),
                target.display()
            );
        }

        Ok(target)
    }

    fn policy_url(&self) -> String {
        self.path.display().to_string()
    }

    fn subdir(&self) -> &str {
        "policy"
    }
}

async fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];

    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst)
            .await
            .with_context(|| format!("create directory {}", dst.display()))?;

        let mut entries = tokio::fs::read_dir(&src)
            .await
            .with_context(|| format!("read directory {}", src.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let src_path = entry.path();
            let dst_path = dst.join(entry.file_name());

            if entry.file_type().await?.is_dir() {
                pending.push((src_path, dst_path));
            } else {
                tokio::fs::copy(&src_path, &dst_path)
                    .await
                    .with_context(|| format!("copy {}", src_path.display()))?;
            }
        }
    }

    Ok(())
}
