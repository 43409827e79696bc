//! Turns flags and overrides into the per-name actions sent to the backend
//!
//! Precedence is override > flag > auto-association > ignore. Each step is a
//! small `ResolutionRule`; the resolver runs them in order and the first rule
//! that produces an action wins. The final rule always produces one, so every
//! option ends up with exactly one action.

use super::{ChoiceStore, Conflict, ConflictOption, Override, OverrideAction, OverrideStore};
use crate::types::{ConflictActions, ConflictId, PatientId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of action the backend applies to a sheet name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Keep the name (existing patient or new one created from it)
    Selected,
    /// Ignore the name
    NotSelected,
    /// Rewrite the name to another patient
    Replace,
    /// Create a fresh patient from the name text
    CreateNew,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Selected => "selected",
            ActionKind::NotSelected => "not_selected",
            ActionKind::Replace => "replace",
            ActionKind::CreateNew => "create_new",
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Final decision for one sheet name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAction {
    pub action: ActionKind,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<PatientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_with_id: Option<PatientId>,
    /// The link was inferred from the first flagged name, not chosen
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_associated: bool,
}

impl ResolvedAction {
    fn base(action: ActionKind, dates: &[String]) -> Self {
        Self {
            action,
            dates: dates.to_vec(),
            patient_id: None,
            replace_with: None,
            replace_with_id: None,
            auto_associated: false,
        }
    }

    pub fn selected(dates: &[String], patient_id: Option<PatientId>) -> Self {
        Self {
            patient_id,
            ..Self::base(ActionKind::Selected, dates)
        }
    }

    pub fn not_selected(dates: &[String]) -> Self {
        Self::base(ActionKind::NotSelected, dates)
    }

    pub fn create_new(dates: &[String]) -> Self {
        Self::base(ActionKind::CreateNew, dates)
    }

    pub fn replace(
        dates: &[String],
        replace_with: impl Into<String>,
        replace_with_id: Option<PatientId>,
    ) -> Self {
        Self {
            replace_with: Some(replace_with.into()),
            replace_with_id,
            ..Self::base(ActionKind::Replace, dates)
        }
    }

    pub fn auto_associated(mut self) -> Self {
        self.auto_associated = true;
        self
    }
}

/// Everything a rule may look at for one option
pub struct OptionContext<'a> {
    pub conflict: &'a Conflict,
    pub option: &'a ConflictOption,
    pub override_entry: Option<&'a Override>,
    pub flagged: &'a [String],
}

impl OptionContext<'_> {
    fn is_flagged(&self) -> bool {
        self.flagged.iter().any(|n| *n == self.option.name)
    }

    fn first_flagged(&self) -> Option<&str> {
        self.flagged.first().map(String::as_str)
    }

    fn override_action(&self) -> Option<OverrideAction> {
        self.override_entry.map(|o| o.action)
    }
}

/// One step of the precedence chain
pub trait ResolutionRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce an action, or `None` to defer to the next rule
    fn apply(&self, ctx: &OptionContext<'_>) -> Option<ResolvedAction>;
}

/// Override `replace` with a chosen target
struct OverrideReplace;

impl ResolutionRule for OverrideReplace {
    fn name(&self) -> &'static str {
        "override_replace"
    }

    fn apply(&self, ctx: &OptionContext<'_>) -> Option<ResolvedAction> {
        let entry = ctx.override_entry?;
        let target = entry.replace_target()?;
        Some(ResolvedAction::replace(
            &ctx.option.dates,
            target,
            entry.replace_with.clone(),
        ))
    }
}

/// Override `new` that was never turned into a replace
struct OverrideNew;

impl ResolutionRule for OverrideNew {
    fn name(&self) -> &'static str {
        "override_new"
    }

    fn apply(&self, ctx: &OptionContext<'_>) -> Option<ResolvedAction> {
        (ctx.override_action()? == OverrideAction::New)
            .then(|| ResolvedAction::create_new(&ctx.option.dates))
    }
}

struct OverrideKeep;

impl ResolutionRule for OverrideKeep {
    fn name(&self) -> &'static str {
        "override_keep"
    }

    fn apply(&self, ctx: &OptionContext<'_>) -> Option<ResolvedAction> {
        (ctx.override_action()? == OverrideAction::Keep)
            .then(|| ResolvedAction::selected(&ctx.option.dates, None))
    }
}

struct Flagged;

impl ResolutionRule for Flagged {
    fn name(&self) -> &'static str {
        "flagged"
    }

    fn apply(&self, ctx: &OptionContext<'_>) -> Option<ResolvedAction> {
        ctx.is_flagged().then(|| {
            ResolvedAction::selected(&ctx.option.dates, ctx.option.patient_id.clone())
        })
    }
}

/// Unflagged names follow the first flagged name of their conflict
struct AutoAssociate;

impl ResolutionRule for AutoAssociate {
    fn name(&self) -> &'static str {
        "auto_associate"
    }

    fn apply(&self, ctx: &OptionContext<'_>) -> Option<ResolvedAction> {
        let target = ctx.first_flagged()?;
        if target == ctx.option.name {
            return None;
        }
        let target_id = ctx
            .conflict
            .option(target)
            .and_then(|o| o.patient_id.clone());
        Some(ResolvedAction::replace(&ctx.option.dates, target, target_id).auto_associated())
    }
}

struct Ignore;

impl ResolutionRule for Ignore {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn apply(&self, ctx: &OptionContext<'_>) -> Option<ResolvedAction> {
        Some(ResolvedAction::not_selected(&ctx.option.dates))
    }
}

/// Something the user may want to double check before submitting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionWarning {
    /// The same name appears in more than one conflict; the later one wins
    NameCollision {
        name: String,
        overwritten: ConflictId,
        kept: ConflictId,
        actions_differ: bool,
    },
}

/// Status badge shown next to one option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPreview {
    /// Kept as its own patient, nothing to show
    None,
    /// Manually linked to another patient
    ReplaceWith(String),
    CreateNew,
    /// Will follow the first flagged name
    AutoAssociate(String),
    /// Will be ignored
    Ignored,
}

/// Counts per action kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub selected: usize,
    pub not_selected: usize,
    pub replaced: usize,
    pub auto_associated: usize,
    pub create_new: usize,
}

/// Output of a resolver run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResolution {
    pub actions: ConflictActions,
    pub warnings: Vec<ResolutionWarning>,
}

impl SyncResolution {
    pub fn get(&self, name: &str) -> Option<&ResolvedAction> {
        self.actions.get(name)
    }

    pub fn summary(&self) -> ResolutionSummary {
        let mut summary = ResolutionSummary::default();
        for action in self.actions.values() {
            match action.action {
                ActionKind::Selected => summary.selected += 1,
                ActionKind::NotSelected => summary.not_selected += 1,
                ActionKind::CreateNew => summary.create_new += 1,
                ActionKind::Replace if action.auto_associated => summary.auto_associated += 1,
                ActionKind::Replace => summary.replaced += 1,
            }
        }
        summary
    }
}

/// Ordered chain of resolution rules
pub struct ActionResolver {
    rules: Vec<Box<dyn ResolutionRule>>,
}

impl Default for ActionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionResolver {
    /// Resolver with the standard precedence chain
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(OverrideReplace),
                Box::new(OverrideNew),
                Box::new(OverrideKeep),
                Box::new(Flagged),
                Box::new(AutoAssociate),
                Box::new(Ignore),
            ],
        }
    }

    /// Names of the rules, in evaluation order
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Resolve a single option
    pub fn resolve_option(
        &self,
        conflict: &Conflict,
        option: &ConflictOption,
        choices: &ChoiceStore,
        overrides: &OverrideStore,
    ) -> ResolvedAction {
        let ctx = OptionContext {
            conflict,
            option,
            override_entry: overrides.for_option(&conflict.id, &option.name),
            flagged: choices.selected(&conflict.id),
        };
        for rule in &self.rules {
            if let Some(action) = rule.apply(&ctx) {
                tracing::debug!(
                    conflict = %conflict.id,
                    name = %option.name,
                    rule = rule.name(),
                    action = action.action.as_str(),
                    "Resolved conflict option"
                );
                return action;
            }
        }
        ResolvedAction::not_selected(&option.dates)
    }

    /// Resolve every option of every conflict into one flat map
    pub fn resolve(
        &self,
        conflicts: &[Conflict],
        choices: &ChoiceStore,
        overrides: &OverrideStore,
    ) -> SyncResolution {
        let mut resolution = SyncResolution::default();
        let mut origin: HashMap<&str, &str> = HashMap::new();

        for conflict in conflicts {
            for option in &conflict.options {
                let action = self.resolve_option(conflict, option, choices, overrides);

                if let Some(previous_conflict) = origin.insert(&option.name, &conflict.id) {
                    let actions_differ = resolution
                        .actions
                        .get(&option.name)
                        .map(|previous| *previous != action)
                        .unwrap_or(false);
                    tracing::warn!(
                        name = %option.name,
                        overwritten = previous_conflict,
                        kept = %conflict.id,
                        actions_differ,
                        "Name appears in more than one conflict, last one wins"
                    );
                    resolution.warnings.push(ResolutionWarning::NameCollision {
                        name: option.name.clone(),
                        overwritten: previous_conflict.to_string(),
                        kept: conflict.id.clone(),
                        actions_differ,
                    });
                }

                resolution.actions.insert(option.name.clone(), action);
            }
        }

        resolution
    }

    /// Badge for one option, consistent with what `resolve` would submit
    pub fn preview(
        &self,
        conflict: &Conflict,
        option_name: &str,
        choices: &ChoiceStore,
        overrides: &OverrideStore,
    ) -> Option<ActionPreview> {
        let option = conflict.option(option_name)?;
        let action = self.resolve_option(conflict, option, choices, overrides);
        let preview = match action.action {
            ActionKind::Selected => ActionPreview::None,
            ActionKind::NotSelected => ActionPreview::Ignored,
            ActionKind::CreateNew => ActionPreview::CreateNew,
            ActionKind::Replace => {
                let target = action.replace_with.unwrap_or_default();
                if action.auto_associated {
                    ActionPreview::AutoAssociate(target)
                } else {
                    ActionPreview::ReplaceWith(target)
                }
            }
        };
        Some(preview)
    }
}
