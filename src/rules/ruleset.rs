//! Rules and rulesets.
//!
//! A rule routes files matched by a library pattern to a destination
//! template. Rules are totally ordered by `(priority, insertion_index)`; the
//! insertion index is assigned by the ruleset and never reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::{PersistenceError, ReferentialIntegrityError, RulesetError};
use crate::pattern::{parse_predicates, ParseOptions, PatternLibrary, Predicate};
use crate::store::{self, FORMAT_VERSION};

use super::template::DestinationTemplate;

/// What happens to a routed file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    #[default]
    Move,
    Copy,
}

fn default_true() -> bool {
    true
}

/// Persisted form of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: String,
    pub name: String,
    pub pattern_id: String,
    pub destination_template: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Predicates in the compound grammar, all of which must pass
    #[serde(default)]
    pub extra_conditions: Vec<String>,
    #[serde(default)]
    pub action: RuleAction,
}

/// A rule with its parsed template and compiled conditions
#[derive(Debug, Clone)]
pub struct Rule {
    record: RuleRecord,
    template: DestinationTemplate,
    conditions: Vec<Predicate>,
    insertion_index: u64,
    diagnostic: Option<String>,
}

impl Rule {
    fn compile(
        record: RuleRecord,
        insertion_index: u64,
        options: ParseOptions,
    ) -> Result<Self, RulesetError> {
        let template = DestinationTemplate::parse(&record.destination_template)?;

        let mut conditions = Vec::new();
        for condition in &record.extra_conditions {
            let predicates = parse_predicates(condition, options).map_err(|source| {
                RulesetError::Condition {
                    condition: condition.clone(),
                    source,
                }
            })?;
            conditions.extend(predicates);
        }

        Ok(Self {
            record,
            template,
            conditions,
            insertion_index,
            diagnostic: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn pattern_id(&self) -> &str {
        &self.record.pattern_id
    }

    pub fn priority(&self) -> i32 {
        self.record.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.record.enabled
    }

    pub fn action(&self) -> RuleAction {
        self.record.action
    }

    pub fn insertion_index(&self) -> u64 {
        self.insertion_index
    }

    pub fn template(&self) -> &DestinationTemplate {
        &self.template
    }

    pub fn conditions(&self) -> &[Predicate] {
        &self.conditions
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Why the rule was disabled at load time, if it was
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn record(&self) -> &RuleRecord {
        &self.record
    }

    /// Evaluation order key: lower sorts first
    pub fn order_key(&self) -> (i32, u64) {
        (self.record.priority, self.insertion_index)
    }

    /// Capture names available to the template from the conditions
    pub fn condition_captures(&self) -> Vec<String> {
        self.conditions.iter().flat_map(Predicate::capture_names).collect()
    }
}

/// Input for creating a rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub pattern_id: String,
    pub destination_template: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub extra_conditions: Vec<String>,
    #[serde(default)]
    pub action: RuleAction,
}

impl RuleDraft {
    pub fn new(name: &str, pattern_id: &str, destination_template: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            pattern_id: pattern_id.to_string(),
            destination_template: destination_template.to_string(),
            priority,
            ..Default::default()
        }
    }

    pub fn with_conditions(mut self, conditions: &[&str]) -> Self {
        self.extra_conditions = conditions.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.action = action;
        self
    }
}

/// Partial update of a rule; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleEdit {
    pub name: Option<String>,
    pub pattern_id: Option<String>,
    pub destination_template: Option<String>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub extra_conditions: Option<Vec<String>>,
    pub action: Option<RuleAction>,
}

/// A rule that was disabled while loading a ruleset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadDiagnostic {
    pub ruleset_id: String,
    pub rule_id: String,
    pub error: ReferentialIntegrityError,
}

/// Persisted form of a ruleset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetDocument {
    #[serde(default)]
    pub format_version: u32,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub rules: Vec<RuleRecord>,
}

/// Ordered collection of rules
#[derive(Debug, Clone)]
pub struct Ruleset {
    id: String,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    rules: Vec<Rule>,
    next_index: u64,
}

impl Ruleset {
    pub fn new(name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            modified_at: now,
            rules: Vec::new(),
            next_index: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.touch();
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
        self.touch();
    }

    /// Rules in insertion order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id() == id)
    }

    /// Rules in evaluation order
    pub fn ordered(&self) -> Vec<&Rule> {
        let mut ordered: Vec<&Rule> = self.rules.iter().collect();
        ordered.sort_by_key(|r| r.order_key());
        ordered
    }

    /// Validate a draft against `library` and append it. Acquires the pattern.
    pub fn add_rule(
        &mut self,
        draft: RuleDraft,
        library: &mut PatternLibrary,
    ) -> Result<String, RulesetError> {
        let record = RuleRecord {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            pattern_id: draft.pattern_id,
            destination_template: draft.destination_template,
            priority: draft.priority,
            enabled: true,
            extra_conditions: draft.extra_conditions,
            action: draft.action,
        };
        let rule = self.validated(record, self.next_index, library)?;

        library
            .acquire(rule.pattern_id())
            .map_err(|_| missing(rule.id(), rule.pattern_id()))?;

        let id = rule.id().to_string();
        tracing::debug!(ruleset_id = %self.id, rule_id = %id, priority = rule.priority(), "Added rule");
        self.rules.push(rule);
        self.next_index += 1;
        self.touch();
        Ok(id)
    }

    /// Apply an edit atomically, moving the pattern reference when it changes
    pub fn update_rule(
        &mut self,
        rule_id: &str,
        edit: RuleEdit,
        library: &mut PatternLibrary,
    ) -> Result<(), RulesetError> {
        let position = self
            .rules
            .iter()
            .position(|r| r.id() == rule_id)
            .ok_or_else(|| RulesetError::RuleNotFound(rule_id.to_string()))?;
        let current = &self.rules[position];

        let mut record = current.record.clone();
        if let Some(name) = edit.name {
            record.name = name;
        }
        if let Some(pattern_id) = edit.pattern_id {
            record.pattern_id = pattern_id;
        }
        if let Some(template) = edit.destination_template {
            record.destination_template = template;
        }
        if let Some(priority) = edit.priority {
            record.priority = priority;
        }
        if let Some(enabled) = edit.enabled {
            record.enabled = enabled;
        }
        if let Some(conditions) = edit.extra_conditions {
            record.extra_conditions = conditions;
        }
        if let Some(action) = edit.action {
            record.action = action;
        }

        let previous_pattern = current.pattern_id().to_string();
        let rule = self.validated(record, current.insertion_index, library)?;

        if rule.pattern_id() != previous_pattern {
            library
                .acquire(rule.pattern_id())
                .map_err(|_| missing(rule.id(), rule.pattern_id()))?;
            library.release(&previous_pattern);
        }

        self.rules[position] = rule;
        self.touch();
        Ok(())
    }

    /// Remove a rule, releasing its pattern
    pub fn remove_rule(
        &mut self,
        rule_id: &str,
        library: &mut PatternLibrary,
    ) -> Result<RuleRecord, RulesetError> {
        let position = self
            .rules
            .iter()
            .position(|r| r.id() == rule_id)
            .ok_or_else(|| RulesetError::RuleNotFound(rule_id.to_string()))?;
        let rule = self.rules.remove(position);
        library.release(rule.pattern_id());
        self.touch();
        Ok(rule.record)
    }

    pub fn set_enabled(&mut self, rule_id: &str, enabled: bool) -> Result<(), RulesetError> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id() == rule_id)
            .ok_or_else(|| RulesetError::RuleNotFound(rule_id.to_string()))?;
        rule.record.enabled = enabled;
        if enabled {
            rule.diagnostic = None;
        }
        self.touch();
        Ok(())
    }

    /// Pattern ids referenced by rules, one entry per rule
    pub fn referenced_patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(Rule::pattern_id)
    }

    pub fn to_document(&self) -> RulesetDocument {
        RulesetDocument {
            format_version: FORMAT_VERSION,
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
            rules: self.rules.iter().map(|r| r.record.clone()).collect(),
        }
    }

    /// Rebuild a ruleset. Rules referencing patterns missing from `library`
    /// are disabled and reported; usage counters are left to the caller.
    pub fn from_document(
        document: RulesetDocument,
        library: &PatternLibrary,
    ) -> Result<(Self, Vec<LoadDiagnostic>), PersistenceError> {
        store::check_version(document.format_version)?;

        let options = ParseOptions {
            case_sensitive: library.default_case_sensitive(),
        };
        let mut diagnostics = Vec::new();
        let mut rules = Vec::with_capacity(document.rules.len());

        for (index, record) in document.rules.into_iter().enumerate() {
            let mut rule = Rule::compile(record, index as u64, options)?;

            if !library.contains(rule.pattern_id()) {
                let error = missing(rule.id(), rule.pattern_id());
                tracing::warn!(
                    ruleset_id = %document.id,
                    rule_id = %rule.id(),
                    pattern_id = %rule.pattern_id(),
                    "Disabling rule with missing pattern"
                );
                rule.record.enabled = false;
                rule.diagnostic = Some(error.to_string());
                diagnostics.push(LoadDiagnostic {
                    ruleset_id: document.id.clone(),
                    rule_id: rule.id().to_string(),
                    error,
                });
            }
            rules.push(rule);
        }

        let next_index = rules.len() as u64;
        Ok((
            Self {
                id: document.id,
                name: document.name,
                description: document.description,
                created_at: document.created_at,
                modified_at: document.modified_at,
                rules,
                next_index,
            },
            diagnostics,
        ))
    }

    pub fn load(
        path: &Path,
        library: &PatternLibrary,
    ) -> Result<(Self, Vec<LoadDiagnostic>), PersistenceError> {
        let document: RulesetDocument = store::load_json(path)?;
        Self::from_document(document, library)
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        store::save_json(path, &self.to_document())
    }

    fn validated(
        &self,
        record: RuleRecord,
        insertion_index: u64,
        library: &PatternLibrary,
    ) -> Result<Rule, RulesetError> {
        let pattern = library
            .get(&record.pattern_id)
            .ok_or_else(|| missing(&record.id, &record.pattern_id))?;
        let options = ParseOptions {
            case_sensitive: library.default_case_sensitive(),
        };

        let rule = Rule::compile(record, insertion_index, options)?;

        let mut captures = pattern.spec().capture_names();
        captures.extend(rule.condition_captures());
        rule.template.validate(&captures)?;
        Ok(rule)
    }

    fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

fn missing(rule_id: &str, pattern_id: &str) -> ReferentialIntegrityError {
    ReferentialIntegrityError::MissingPattern {
        rule_id: rule_id.to_string(),
        pattern_id: pattern_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;
    use crate::pattern::PatternDraft;
    use tempfile::tempdir;

    fn setup() -> (PatternLibrary, String) {
        let mut library = PatternLibrary::new(true);
        let id = library
            .create(PatternDraft::glob("Invoices", "invoice_{vendor}_*.pdf"))
            .unwrap();
        (library, id)
    }

    #[test]
    fn test_add_rule_acquires_pattern() {
        let (mut library, pattern) = setup();
        let mut ruleset = Ruleset::new("Default", "");

        let rule = ruleset
            .add_rule(RuleDraft::new("Invoices", &pattern, "Invoices/{vendor}", 1), &mut library)
            .unwrap();
        assert_eq!(library.get(&pattern).unwrap().usage_count(), 1);
        assert_eq!(ruleset.rule(&rule).unwrap().insertion_index(), 0);

        ruleset.remove_rule(&rule, &mut library).unwrap();
        assert_eq!(library.get(&pattern).unwrap().usage_count(), 0);
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let (mut library, pattern) = setup();
        let mut ruleset = Ruleset::new("Default", "");

        let err = ruleset
            .add_rule(RuleDraft::new("Bad", &pattern, "Invoices/{customer}", 1), &mut library)
            .unwrap_err();
        assert_eq!(
            err,
            RulesetError::Template(TemplateError::UnknownPlaceholder {
                placeholder: "customer".to_string()
            })
        );
        assert!(ruleset.rules().is_empty());
        assert_eq!(library.get(&pattern).unwrap().usage_count(), 0);
    }

    #[test]
    fn test_condition_captures_allowed_in_template() {
        let (mut library, pattern) = setup();
        let mut ruleset = Ruleset::new("Default", "");
        ruleset
            .add_rule(
                RuleDraft::new("Dated", &pattern, "Invoices/{vendor}/{yy}", 1)
                    .with_conditions(&["name GLOB '*_{yy}.pdf'"]),
                &mut library,
            )
            .unwrap();
    }

    #[test]
    fn test_invalid_condition_rejected() {
        let (mut library, pattern) = setup();
        let mut ruleset = Ruleset::new("Default", "");
        let err = ruleset
            .add_rule(
                RuleDraft::new("Big", &pattern, "Invoices", 1).with_conditions(&["size >> 1MB"]),
                &mut library,
            )
            .unwrap_err();
        assert!(matches!(err, RulesetError::Condition { .. }));
    }

    #[test]
    fn test_missing_pattern_rejected() {
        let (mut library, _) = setup();
        let mut ruleset = Ruleset::new("Default", "");
        let err = ruleset
            .add_rule(RuleDraft::new("Ghost", "nope", "x", 1), &mut library)
            .unwrap_err();
        assert!(matches!(
            err,
            RulesetError::Integrity(ReferentialIntegrityError::MissingPattern { .. })
        ));
    }

    #[test]
    fn test_ordering_by_priority_then_insertion() {
        let (mut library, pattern) = setup();
        let mut ruleset = Ruleset::new("Default", "");
        let late = ruleset
            .add_rule(RuleDraft::new("b", &pattern, "b", 5), &mut library)
            .unwrap();
        let first = ruleset
            .add_rule(RuleDraft::new("a", &pattern, "a", 1), &mut library)
            .unwrap();
        let tie = ruleset
            .add_rule(RuleDraft::new("c", &pattern, "c", 5), &mut library)
            .unwrap();

        let ids: Vec<&str> = ruleset.ordered().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![first.as_str(), late.as_str(), tie.as_str()]);
    }

    #[test]
    fn test_update_moves_pattern_reference() {
        let (mut library, pattern) = setup();
        let other = library.create(PatternDraft::glob("Any", "*")).unwrap();
        let mut ruleset = Ruleset::new("Default", "");
        let rule = ruleset
            .add_rule(RuleDraft::new("r", &pattern, "Invoices/{vendor}", 1), &mut library)
            .unwrap();

        // The template still needs {vendor}, which the new pattern lacks
        let err = ruleset
            .update_rule(
                &rule,
                RuleEdit {
                    pattern_id: Some(other.clone()),
                    ..Default::default()
                },
                &mut library,
            )
            .unwrap_err();
        assert!(matches!(err, RulesetError::Template(_)));
        assert_eq!(library.get(&pattern).unwrap().usage_count(), 1);

        ruleset
            .update_rule(
                &rule,
                RuleEdit {
                    pattern_id: Some(other.clone()),
                    destination_template: Some("Misc".to_string()),
                    ..Default::default()
                },
                &mut library,
            )
            .unwrap();
        assert_eq!(library.get(&pattern).unwrap().usage_count(), 0);
        assert_eq!(library.get(&other).unwrap().usage_count(), 1);
        assert_eq!(ruleset.rule(&rule).unwrap().insertion_index(), 0);
    }

    #[test]
    fn test_load_disables_rules_with_missing_pattern() {
        let (mut library, pattern) = setup();
        let mut ruleset = Ruleset::new("Default", "desc");
        ruleset
            .add_rule(RuleDraft::new("ok", &pattern, "Invoices", 1), &mut library)
            .unwrap();
        let mut document = ruleset.to_document();
        document.rules.push(RuleRecord {
            id: "r-ghost".to_string(),
            name: "ghost".to_string(),
            pattern_id: "missing".to_string(),
            destination_template: "Ghosts".to_string(),
            priority: 0,
            enabled: true,
            extra_conditions: Vec::new(),
            action: RuleAction::Move,
        });

        let (loaded, diagnostics) = Ruleset::from_document(document, &library).unwrap();
        assert_eq!(loaded.rules().len(), 2);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule_id, "r-ghost");
        assert_eq!(
            diagnostics[0].error,
            ReferentialIntegrityError::MissingPattern {
                rule_id: "r-ghost".to_string(),
                pattern_id: "missing".to_string(),
            }
        );

        let ghost = loaded.rule("r-ghost").unwrap();
        assert!(!ghost.is_enabled());
        assert!(ghost.diagnostic().is_some());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let (mut library, pattern) = setup();
        let mut ruleset = Ruleset::new("Default", "desc");
        ruleset
            .add_rule(
                RuleDraft::new("copy", &pattern, "Invoices", 3).with_action(RuleAction::Copy),
                &mut library,
            )
            .unwrap();
        ruleset.save(&path).unwrap();

        let (loaded, diagnostics) = Ruleset::load(&path, &library).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(loaded.id(), ruleset.id());
        assert_eq!(loaded.rules()[0].record(), ruleset.rules()[0].record());
        assert_eq!(loaded.rules()[0].action(), RuleAction::Copy);
    }
}
