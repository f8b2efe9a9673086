// Copyright (c) 2024 Red Hat, Inc.
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Include/exclude configuration of an enterprise contract policy.
///
/// Patterns select rule results by code, package, term or collection:
/// `*`, `<pkg>`, `<pkg>.*`, `<pkg>.<rule>`, `@<tag>`, each optionally
/// suffixed with `:<term>`. Unknown shapes match nothing.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Patterns naming the rule results to keep. An empty list keeps
    /// everything, as if `["*"]` had been given.
    #[serde(default)]
    pub include: Vec<String>,

    /// Patterns naming the rule results to drop. At equal specificity an
    /// exclude wins over an include.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Older configurations list collections here instead of using
    /// `@<tag>` include patterns. `collections: ["foo"]` behaves exactly
    /// like `include: ["@foo"]`.
    #[serde(default)]
    pub collections: Vec<String>,
}

impl TryFrom<&Path> for PolicyConfig {
    type Error = anyhow::Error;

    /// Load a `PolicyConfig` from a configuration file like:
    ///    {
    ///        "include": ["@minimal"],
    ///        "exclude": ["cve.deprecated_cve_result_name"]
    ///    }
    fn try_from(config_path: &Path) -> Result<Self> {
        let file = File::open(config_path).map_err(|e| {
            anyhow!(
                "failed to open policy configuration {}: {e}",
                config_path.display()
            )
        })?;

        serde_json::from_reader(file)
            .map_err(|e| anyhow!("failed to parse policy configuration: {e}"))
    }
}
