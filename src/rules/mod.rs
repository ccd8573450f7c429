//! Rules, rulesets and rule evaluation.
//!
//! Rules reference library patterns by id and route matching files to a
//! destination template. A workspace holds several rulesets that share one
//! pattern library; exactly one of them is active for an organize pass.

pub mod evaluator;
pub mod ruleset;
pub mod template;
pub mod workspace;

pub use evaluator::{
    ruleset_hash, shadow_warnings, DecisionReason, EffectiveRuleDecision, RuleEvaluator,
    ShadowWarning,
};
pub use ruleset::{
    LoadDiagnostic, Rule, RuleAction, RuleDraft, RuleEdit, RuleRecord, Ruleset, RulesetDocument,
};
pub use template::{DestinationTemplate, TemplateContext, BUILTINS};
pub use workspace::Workspace;
