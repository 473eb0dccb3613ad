//! Capture eligibility rules.
//!
//! A closed set of deny rules evaluated in order with short-circuit OR: the
//! first rule that matches makes the occupant ineligible.

use std::collections::HashSet;

use crate::config::EligibilityConfig;
use crate::hooks::EligibilityPredicate;
use crate::types::OccupantId;

/// What the host knows about an entity when eligibility is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupantInfo {
    /// Entity identity.
    pub id: OccupantId,
    /// Host-defined entity kind (e.g. "crate", "goblin", "boss").
    pub kind: String,
    /// Whether the entity is itself a carrier (a player actor).
    pub is_carrier: bool,
    /// Mass as reported by the balance subsystem.
    pub mass: f32,
}

/// Looks up [`OccupantInfo`] for live entities.
pub trait OccupantCatalog {
    /// Describe `occupant`, or `None` if it is not a live entity.
    fn describe(&self, occupant: OccupantId) -> Option<OccupantInfo>;
}

/// A single deny rule.
#[derive(Debug, Clone, PartialEq)]
pub enum DenyRule {
    /// Entity kinds that can never be captured.
    KindBlacklist(HashSet<String>),
    /// Carriers cannot capture other carriers.
    Carrier,
    /// Entities heavier than the limit.
    MassAbove(f32),
}

impl DenyRule {
    /// Whether this rule refuses `info`.
    #[must_use]
    pub fn denies(&self, info: &OccupantInfo) -> bool {
        match self {
            Self::KindBlacklist(kinds) => kinds.contains(&info.kind),
            Self::Carrier => info.is_carrier,
            Self::MassAbove(limit) => info.mass > *limit,
        }
    }
}

/// Ordered list of deny rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EligibilityPolicy {
    rules: Vec<DenyRule>,
}

impl EligibilityPolicy {
    /// A policy with no rules (everything eligible).
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Build the rule list from configuration.
    ///
    /// `max_mass` is not turned into a rule here: mass depends on the grabbing
    /// carrier and is checked per decision through
    /// [`SlotContext::with_max_mass`](crate::registry::SlotContext::with_max_mass).
    #[must_use]
    pub fn from_config(config: &EligibilityConfig) -> Self {
        let mut rules = Vec::new();
        if config.deny_carriers {
            rules.push(DenyRule::Carrier);
        }
        if !config.blacklisted_kinds.is_empty() {
            rules.push(DenyRule::KindBlacklist(
                config.blacklisted_kinds.iter().cloned().collect(),
            ));
        }
        Self { rules }
    }

    /// Append a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: DenyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The first rule refusing `info`, if any.
    #[must_use]
    pub fn denying_rule(&self, info: &OccupantInfo) -> Option<&DenyRule> {
        self.rules.iter().find(|rule| rule.denies(info))
    }

    /// Whether `info` passes every rule.
    #[must_use]
    pub fn admits(&self, info: &OccupantInfo) -> bool {
        self.denying_rule(info).is_none()
    }
}

/// Adapts a policy plus a catalog into an [`EligibilityPredicate`].
///
/// Entities the catalog cannot describe are ineligible.
#[derive(Debug)]
pub struct CatalogEligibility<'a, C: ?Sized> {
    policy: &'a EligibilityPolicy,
    catalog: &'a C,
}

impl<'a, C: OccupantCatalog + ?Sized> CatalogEligibility<'a, C> {
    /// Combine `policy` with `catalog`.
    #[must_use]
    pub fn new(policy: &'a EligibilityPolicy, catalog: &'a C) -> Self {
        Self { policy, catalog }
    }
}

impl<C: OccupantCatalog + ?Sized> EligibilityPredicate for CatalogEligibility<'_, C> {
    fn is_eligible(&self, occupant: OccupantId) -> bool {
        self.catalog
            .describe(occupant)
            .is_some_and(|info| self.policy.admits(&info))
    }
}
