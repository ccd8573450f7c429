//! Workspace: one pattern library shared by several rulesets.
//!
//! All edits that touch both the library and a ruleset go through here so the
//! usage counters stay consistent with the rules that reference patterns.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LibraryError, PersistenceError, RulesetError};
use crate::pattern::{PatternDraft, PatternEdit, PatternLibrary, PatternRecord};

use super::ruleset::{LoadDiagnostic, RuleDraft, RuleEdit, RuleRecord, Ruleset};

#[derive(Debug, Clone)]
pub struct Workspace {
    library: PatternLibrary,
    rulesets: BTreeMap<String, Ruleset>,
    active: Option<String>,
}

impl Workspace {
    pub fn new(library: PatternLibrary) -> Self {
        Self {
            library,
            rulesets: BTreeMap::new(),
            active: None,
        }
    }

    pub fn library(&self) -> &PatternLibrary {
        &self.library
    }

    pub fn rulesets(&self) -> impl Iterator<Item = &Ruleset> {
        self.rulesets.values()
    }

    pub fn ruleset(&self, id: &str) -> Option<&Ruleset> {
        self.rulesets.get(id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_ruleset(&self) -> Option<&Ruleset> {
        self.active.as_deref().and_then(|id| self.rulesets.get(id))
    }

    /// Create an empty ruleset; the first one becomes active
    pub fn create_ruleset(&mut self, name: &str, description: &str) -> String {
        let ruleset = Ruleset::new(name, description);
        let id = ruleset.id().to_string();
        self.rulesets.insert(id.clone(), ruleset);
        if self.active.is_none() {
            self.active = Some(id.clone());
        }
        id
    }

    pub fn set_active(&mut self, id: &str) -> Result<(), RulesetError> {
        if !self.rulesets.contains_key(id) {
            return Err(RulesetError::RulesetNotFound(id.to_string()));
        }
        self.active = Some(id.to_string());
        Ok(())
    }

    /// Remove an inactive ruleset, releasing every pattern its rules reference
    pub fn remove_ruleset(&mut self, id: &str) -> Result<(), RulesetError> {
        if self.active.as_deref() == Some(id) {
            return Err(RulesetError::ActiveRuleset(id.to_string()));
        }
        let ruleset = self
            .rulesets
            .remove(id)
            .ok_or_else(|| RulesetError::RulesetNotFound(id.to_string()))?;
        for pattern_id in ruleset.referenced_patterns() {
            self.library.release(pattern_id);
        }
        Ok(())
    }

    pub fn rename_ruleset(&mut self, id: &str, name: &str, description: &str) -> Result<(), RulesetError> {
        let ruleset = self.ruleset_mut(id)?;
        ruleset.set_name(name);
        ruleset.set_description(description);
        Ok(())
    }

    pub fn create_pattern(&mut self, draft: PatternDraft) -> Result<String, LibraryError> {
        self.library.create(draft)
    }

    pub fn update_pattern(&mut self, id: &str, edit: PatternEdit) -> Result<(), LibraryError> {
        self.library.update(id, edit)
    }

    pub fn delete_pattern(&mut self, id: &str) -> Result<PatternRecord, LibraryError> {
        self.library.delete(id)
    }

    pub fn add_rule(&mut self, ruleset_id: &str, draft: RuleDraft) -> Result<String, RulesetError> {
        let ruleset = self
            .rulesets
            .get_mut(ruleset_id)
            .ok_or_else(|| RulesetError::RulesetNotFound(ruleset_id.to_string()))?;
        ruleset.add_rule(draft, &mut self.library)
    }

    pub fn update_rule(
        &mut self,
        ruleset_id: &str,
        rule_id: &str,
        edit: RuleEdit,
    ) -> Result<(), RulesetError> {
        let ruleset = self
            .rulesets
            .get_mut(ruleset_id)
            .ok_or_else(|| RulesetError::RulesetNotFound(ruleset_id.to_string()))?;
        ruleset.update_rule(rule_id, edit, &mut self.library)
    }

    pub fn remove_rule(&mut self, ruleset_id: &str, rule_id: &str) -> Result<RuleRecord, RulesetError> {
        let ruleset = self
            .rulesets
            .get_mut(ruleset_id)
            .ok_or_else(|| RulesetError::RulesetNotFound(ruleset_id.to_string()))?;
        ruleset.remove_rule(rule_id, &mut self.library)
    }

    pub fn set_rule_enabled(
        &mut self,
        ruleset_id: &str,
        rule_id: &str,
        enabled: bool,
    ) -> Result<(), RulesetError> {
        self.ruleset_mut(ruleset_id)?.set_enabled(rule_id, enabled)
    }

    /// Attach a loaded ruleset, replacing one with the same id.
    /// Usage counters are recomputed from every attached ruleset.
    pub fn attach(&mut self, ruleset: Ruleset) -> String {
        let id = ruleset.id().to_string();
        self.rulesets.insert(id.clone(), ruleset);
        if self.active.is_none() {
            self.active = Some(id.clone());
        }
        self.recount_usage();
        id
    }

    /// Load a ruleset document and attach it
    pub fn import_ruleset(&mut self, path: &Path) -> Result<(String, Vec<LoadDiagnostic>), PersistenceError> {
        let (ruleset, diagnostics) = Ruleset::load(path, &self.library)?;
        tracing::info!(
            ruleset_id = %ruleset.id(),
            rules = ruleset.rules().len(),
            disabled = diagnostics.len(),
            "Loaded ruleset"
        );
        Ok((self.attach(ruleset), diagnostics))
    }

    pub fn save_ruleset(&self, id: &str, path: &Path) -> Result<(), PersistenceError> {
        let ruleset = self
            .rulesets
            .get(id)
            .ok_or_else(|| RulesetError::RulesetNotFound(id.to_string()))?;
        ruleset.save(path)
    }

    /// Replace the library with one loaded from disk; counters follow the rules
    pub fn load_library(&mut self, path: &Path) -> Result<(), PersistenceError> {
        let library = PatternLibrary::load(path, self.library.default_case_sensitive())?;
        tracing::info!(patterns = library.len(), "Loaded pattern library");
        self.library = library;
        self.recount_usage();
        Ok(())
    }

    pub fn save_library(&self, path: &Path) -> Result<(), PersistenceError> {
        self.library.save(path)
    }

    fn recount_usage(&mut self) {
        let referenced: Vec<String> = self
            .rulesets
            .values()
            .flat_map(|r| r.referenced_patterns().map(str::to_string))
            .collect();
        self.library
            .recount_usage(referenced.iter().map(String::as_str));
    }

    fn ruleset_mut(&mut self, id: &str) -> Result<&mut Ruleset, RulesetError> {
        self.rulesets
            .get_mut(id)
            .ok_or_else(|| RulesetError::RulesetNotFound(id.to_string()))
    }
}
