// Copyright (c) 2024 Red Hat, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//

//! Expansion of rule results into match tokens and scoring of
//! include/exclude patterns against them.

use crate::config::PolicyConfig;
use crate::report::{RuleResult, METADATA_CODE};

/// Expand a result's code and term into the tokens an include or exclude
/// pattern may name. A code needs at least a package and a rule part;
/// anything shorter can only be matched by the bare `*` token. Components
/// left of the final `<package>.<rule>` pair carry no selectivity and are
/// ignored.
pub(crate) fn matchers(result: &RuleResult) -> Vec<String> {
    let mut tokens = Vec::new();

    if let Some(code) = result.code() {
        let parts: Vec<&str> = code.split('.').collect();
        if parts.len() >= 2 {
            let package = parts[parts.len() - 2];
            let rule = parts[parts.len() - 1];

            tokens.push(package.to_string());
            tokens.push(format!("{package}.*"));
            tokens.push(format!("{package}.{rule}"));

            if let Some(term) = result.term() {
                tokens.push(format!("{package}:{term}"));
                tokens.push(format!("{package}.*:{term}"));
                tokens.push(format!("{package}.{rule}:{term}"));
            }
        }
    }

    tokens.push("*".to_string());
    tokens
}

/// Specificity of a pattern. A named package scores 10, a named rule
/// adds 100, a term adds 100, the bare wildcard scores 1. Higher wins.
pub(crate) fn score(pattern: &str) -> u32 {
    let mut value = 0;

    let code = match pattern.split_once(':') {
        Some((code, _term)) => {
            value += 100;
            code
        }
        None => pattern,
    };

    let (package, rule) = match code.split_once('.') {
        Some((package, rule)) => (package, Some(rule)),
        None => (code, None),
    };

    if package == "*" {
        value += 1;
    } else {
        value += 10;
    }

    if let Some(rule) = rule {
        if !rule.is_empty() && rule != "*" {
            value += 100;
        }
    }

    value
}

/// Filtering rules compiled from a policy configuration.
#[derive(Clone, Debug, Default)]
pub(crate) struct Criteria {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Criteria {
    pub(crate) fn new(config: &PolicyConfig) -> Self {
        let mut include = config.include.clone();
        include.extend(config.collections.iter().map(|tag| format!("@{tag}")));
        if include.is_empty() {
            include.push("*".to_string());
        }

        Criteria {
            include,
            exclude: config.exclude.clone(),
        }
    }

    /// Decide whether a result survives filtering: the most specific
    /// matching include must strictly outscore the most specific matching
    /// exclude. Results whose code is not a string cannot be classified
    /// and always pass.
    pub(crate) fn includes(&self, result: &RuleResult) -> bool {
        if result.metadata.contains_key(METADATA_CODE) && result.code().is_none() {
            return true;
        }

        let mut tokens = matchers(result);
        tokens.extend(result.collections().iter().map(|tag| format!("@{tag}")));

        let best = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|pattern| tokens.iter().any(|token| token == *pattern))
                .map(|pattern| score(pattern))
                .max()
                .unwrap_or(0)
        };

        best(&self.include) > best(&self.exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::{json, Map};

    fn result(code: &str, term: &str) -> RuleResult {
        let mut metadata = Map::new();
        if !code.is_empty() {
            metadata.insert("code".to_string(), json!(code));
        }
        if !term.is_empty() {
            metadata.insert("term".to_string(), json!(term));
        }
        RuleResult {
            message: String::new(),
            metadata,
        }
    }

    #[rstest]
    #[case::valid(
        "breakfast.spam", "eggs",
        &["breakfast", "breakfast.*", "breakfast.spam", "breakfast:eggs",
          "breakfast.*:eggs", "breakfast.spam:eggs", "*"]
    )]
    #[case::valid_without_term(
        "breakfast.spam", "",
        &["breakfast", "breakfast.*", "breakfast.spam", "*"]
    )]
    #[case::incomplete_code("spam", "", &["*"])]
    #[case::incomplete_code_with_term("spam", "eggs", &["*"])]
    #[case::extra_code_info_ignored(
        "this.is.ignored.breakfast.spam", "",
        &["breakfast", "breakfast.*", "breakfast.spam", "*"]
    )]
    #[case::empty_code("", "", &["*"])]
    #[case::empty_code_with_term("", "eggs", &["*"])]
    fn make_matchers(#[case] code: &str, #[case] term: &str, #[case] want: &[&str]) {
        assert_eq!(matchers(&result(code, term)), want);
    }

    #[rstest]
    #[case("*", 1)]
    #[case("*:term", 101)]
    #[case("*.rule:term", 201)]
    #[case("pkg", 10)]
    #[case("pkg.", 10)]
    #[case("pkg.*", 10)]
    #[case("pkg.rule", 110)]
    #[case("pkg.:term", 110)]
    #[case("pkg.*:term", 110)]
    #[case("pkg:term", 110)]
    #[case("pkg.rule:term", 210)]
    #[case("@collection", 10)]
    fn name_scoring(#[case] pattern: &str, #[case] want: u32) {
        assert_eq!(score(pattern), want);
    }

    #[test]
    fn default_include_is_everything() {
        let criteria = Criteria::new(&PolicyConfig::default());
        assert!(criteria.includes(&result("breakfast.spam", "")));
    }

    #[test]
    fn exclude_wins_ties() {
        let criteria = Criteria::new(&PolicyConfig {
            include: vec!["breakfast.spam".to_string()],
            exclude: vec!["breakfast.spam".to_string()],
            ..Default::default()
        });
        assert!(!criteria.includes(&result("breakfast.spam", "")));
    }

    #[test]
    fn specific_include_beats_package_exclude() {
        let criteria = Criteria::new(&PolicyConfig {
            include: vec!["*".to_string(), "breakfast.spam".to_string()],
            exclude: vec!["breakfast.*".to_string()],
            ..Default::default()
        });
        assert!(criteria.includes(&result("breakfast.spam", "")));
        assert!(!criteria.includes(&result("breakfast.eggs", "")));
        assert!(criteria.includes(&result("lunch.spam", "")));
    }

    #[test]
    fn collections_expand_to_tagged_tokens() {
        let criteria = Criteria::new(&PolicyConfig {
            include: vec!["@foo".to_string()],
            ..Default::default()
        });

        let mut tagged = result("breakfast.spam", "");
        tagged
            .metadata
            .insert("collections".to_string(), json!(["foo"]));
        assert!(criteria.includes(&tagged));

        // No collection, and no other include to match.
        assert!(!criteria.includes(&result("dinner.spam", "")));
    }

    #[test]
    fn legacy_collections_behave_like_tagged_includes() {
        let legacy = Criteria::new(&PolicyConfig {
            collections: vec!["foo".to_string()],
            ..Default::default()
        });
        let tagged = Criteria::new(&PolicyConfig {
            include: vec!["@foo".to_string()],
            ..Default::default()
        });

        let mut with_collection = result("breakfast.spam", "");
        with_collection
            .metadata
            .insert("collections".to_string(), json!(["foo"]));

        let without_collection = result("lunch.spam", "");
        for candidate in [&with_collection, &without_collection] {
            assert_eq!(legacy.includes(candidate), tagged.includes(candidate));
        }
    }

    #[test]
    fn non_string_code_is_kept() {
        let criteria = Criteria::new(&PolicyConfig {
            exclude: vec!["*".to_string()],
            ..Default::default()
        });

        let mut unclassifiable = RuleResult::default();
        unclassifiable.metadata.insert("code".to_string(), json!(0));
        assert!(criteria.includes(&unclassifiable));
    }

    #[test]
    fn term_selects_within_a_package() {
        let criteria = Criteria::new(&PolicyConfig {
            include: vec!["breakfast:eggs".to_string()],
            ..Default::default()
        });

        assert!(criteria.includes(&result("breakfast.spam", "eggs")));
        assert!(!criteria.includes(&result("breakfast.spam", "bacon")));
        assert!(!criteria.includes(&result("breakfast.sausage", "")));
        assert!(!criteria.includes(&result("not_breakfast.spam", "eggs")));
    }
}
