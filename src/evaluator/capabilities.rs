// Copyright (c) 2024 Red Hat, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//

//! Restricted capability documents for the rule engine.
//!
//! Policy rules run sandboxed: the builtins that reach out of the engine
//! are removed and outbound network access is denied. The resulting
//! document is written into the evaluation work dir and handed to the
//! runner by path.

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// File name of the capability document inside the work dir.
pub const CAPABILITIES_FILENAME: &str = "capabilities.json";

/// Builtins stripped from the default capability document. `opa.runtime`
/// leaks host environment details, the other two reach the network.
const DISALLOWED_BUILTINS: &[&str] = &["opa.runtime", "http.send", "net.lookup_ip_addr"];

/// The rule engine's stock capability document.
pub(crate) fn default_capabilities() -> Value {
    json!({
        "builtins": [
            { "name": "eq", "infix": "=" },
            { "name": "equal", "infix": "==" },
            { "name": "neq", "infix": "!=" },
            { "name": "count" },
            { "name": "concat" },
            { "name": "contains" },
            { "name": "sprintf" },
            { "name": "split" },
            { "name": "startswith" },
            { "name": "endswith" },
            { "name": "json.unmarshal" },
            { "name": "json.marshal" },
            { "name": "time.now_ns" },
            { "name": "time.parse_rfc3339_ns" },
            { "name": "regex.match" },
            { "name": "glob.match" },
            { "name": "object.get" },
            { "name": "array.concat" },
            { "name": "opa.runtime" },
            { "name": "http.send" },
            { "name": "net.lookup_ip_addr" },
            { "name": "net.cidr_contains" },
        ],
        "allow_net": null,
        "future_keywords": ["contains", "every", "if", "in"],
    })
}

/// Produce the restricted capability document: the deny-listed builtins
/// are removed and `allow_net` is set to `[""]`, which matches no host.
pub(crate) fn strict_capabilities(base: Option<&str>) -> Result<String> {
    let mut document = match base {
        Some(text) => {
            serde_json::from_str(text).context("parse base capabilities document")?
        }
        None => default_capabilities(),
    };

    if let Some(builtins) = document
        .get_mut("builtins")
        .and_then(Value::as_array_mut)
    {
        builtins.retain(|builtin| {
            builtin
                .get("name")
                .and_then(Value::as_str)
                .map_or(true, |name| !DISALLOWED_BUILTINS.contains(&name))
        });
    }

    document["allow_net"] = json!([""]);

    serde_json::to_string(&document).context("serialize capabilities document")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn builtin_names(document: &Value) -> HashSet<String> {
        document["builtins"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|builtin| builtin["name"].as_str())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn disallowed_builtins_are_removed() {
        let strict: Value = serde_json::from_str(&strict_capabilities(None).unwrap()).unwrap();

        let removed: HashSet<String> = builtin_names(&default_capabilities())
            .difference(&builtin_names(&strict))
            .cloned()
            .collect();

        let expected: HashSet<String> =
            DISALLOWED_BUILTINS.iter().map(|s| s.to_string()).collect();
        assert_eq!(removed, expected);
    }

    #[test]
    fn network_access_is_denied() {
        let strict: Value = serde_json::from_str(&strict_capabilities(None).unwrap()).unwrap();
        assert_eq!(strict["allow_net"], serde_json::json!([""]));
    }

    #[test]
    fn base_document_can_be_supplied() {
        let base = r#"{"builtins": [{"name": "http.send"}, {"name": "count"}]}"#;
        let strict: Value =
            serde_json::from_str(&strict_capabilities(Some(base)).unwrap()).unwrap();

        let names = builtin_names(&strict);
        assert!(names.contains("count"));
        assert!(!names.contains("http.send"));
    }

    #[test]
    fn invalid_base_document_is_an_error() {
        assert!(strict_capabilities(Some("not json")).is_err());
    }
}
