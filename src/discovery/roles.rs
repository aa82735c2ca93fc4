//! Role inference from model identifiers

use std::collections::BTreeSet;

use crate::types::Role;

/// Match rule: any of `patterns` and none of `unless` selects `roles`
#[derive(Debug, Clone, Copy)]
pub struct RoleRule {
    pub patterns: &'static [&'static str],
    pub unless: &'static [&'static str],
    pub roles: &'static [Role],
}

impl RoleRule {
    /// `lowered` must already be lowercase
    fn matches(&self, lowered: &str) -> bool {
        self.patterns.iter().any(|p| lowered.contains(p))
            && !self.unless.iter().any(|p| lowered.contains(p))
    }
}

pub const ROLE_RULES: &[RoleRule] = &[
    RoleRule {
        patterns: &["router"],
        unless: &[],
        roles: &[Role::ModelRouter, Role::TaskClassifier],
    },
    RoleRule {
        patterns: &["coder", "code"],
        unless: &[],
        roles: &[Role::CodeAssistant],
    },
    RoleRule {
        patterns: &["embed", "bge", "nomic", "e5-"],
        unless: &[],
        roles: &[Role::Embedder],
    },
    RoleRule {
        patterns: &["deepseek-r1", "reason", "qwq"],
        unless: &[],
        roles: &[Role::Reasoner],
    },
    RoleRule {
        patterns: &["qwen"],
        unless: &["coder"],
        roles: &[Role::Summarizer, Role::TaskClassifier],
    },
    RoleRule {
        patterns: &["summar"],
        unless: &[],
        roles: &[Role::Summarizer],
    },
    RoleRule {
        patterns: &["classif"],
        unless: &[],
        roles: &[Role::TaskClassifier],
    },
];

/// Roles a model is suited for, judged from its identifier.
///
/// Union of every matching rule; `{Custom}` when nothing matches.
pub fn infer_roles(identifier: &str) -> BTreeSet<Role> {
    infer_roles_with(ROLE_RULES, identifier)
}

pub fn infer_roles_with(rules: &[RoleRule], identifier: &str) -> BTreeSet<Role> {
    let lowered = identifier.to_lowercase();
    let mut roles: BTreeSet<Role> = rules
        .iter()
        .filter(|rule| rule.matches(&lowered))
        .flat_map(|rule| rule.roles.iter().copied())
        .collect();

    if roles.is_empty() {
        roles.insert(Role::Custom);
    }
    roles
}
