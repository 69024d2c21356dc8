//! Plan & quota engine
//!
//! Pure decisions over a plan tier and current usage. Built once from
//! configuration and shared read-only between requests.

use std::collections::BTreeMap;

use crate::config::{PlanLimits, PlansConfig};

/// Tier assigned to newly registered tenants
pub const DEFAULT_TIER: &str = "free";

/// Quota tables for every configured tier
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    tiers: BTreeMap<String, PlanLimits>,
    fallback: PlanLimits,
}

impl PlanCatalog {
    pub fn new(config: &PlansConfig) -> Self {
        let fallback = most_restrictive(config.tiers.values());
        Self {
            tiers: config.tiers.clone(),
            fallback,
        }
    }

    /// Limits for a tier; unknown tiers get the most restrictive ceilings
    pub fn limits(&self, tier: &str) -> &PlanLimits {
        self.tiers.get(tier).unwrap_or(&self.fallback)
    }

    pub fn is_known_tier(&self, tier: &str) -> bool {
        self.tiers.contains_key(tier)
    }

    /// `None` means unlimited
    pub fn max_forms(&self, tier: &str) -> Option<u32> {
        self.limits(tier).max_forms
    }

    pub fn max_fields(&self, tier: &str) -> u32 {
        self.limits(tier).max_fields
    }

    pub fn max_responses(&self, tier: &str) -> u32 {
        self.limits(tier).max_responses
    }

    pub fn can_create_form(&self, tier: &str, active_forms: u32) -> bool {
        match self.max_forms(tier) {
            Some(limit) => active_forms < limit,
            None => true,
        }
    }

    pub fn can_use_field_count(&self, tier: &str, field_count: usize) -> bool {
        field_count > 0 && field_count <= self.max_fields(tier) as usize
    }

    /// Ceiling frozen onto a form at creation time
    pub fn response_ceiling_for(&self, tier: &str) -> u32 {
        self.max_responses(tier)
    }

    /// Tier to move to once the tenant has configured its own store
    pub fn upgrade_on_storage_config(&self, tier: &str) -> Option<&str> {
        self.limits(tier)
            .upgrade_on_storage_config
            .as_deref()
            .filter(|target| self.is_known_tier(target))
    }

    /// Every configured storage-config upgrade, keyed by the tier it leaves
    pub fn storage_upgrades(&self) -> BTreeMap<String, String> {
        self.tiers
            .keys()
            .filter_map(|tier| {
                self.upgrade_on_storage_config(tier)
                    .map(|target| (tier.clone(), target.to_string()))
            })
            .collect()
    }
}

fn most_restrictive<'a>(tiers: impl Iterator<Item = &'a PlanLimits>) -> PlanLimits {
    let mut fallback: Option<PlanLimits> = None;

    for limits in tiers {
        fallback = Some(match fallback {
            None => PlanLimits {
                upgrade_on_storage_config: None,
                ..limits.clone()
            },
            Some(current) => PlanLimits {
                max_forms: match (current.max_forms, limits.max_forms) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (Some(a), None) | (None, Some(a)) => Some(a),
                    (None, None) => None,
                },
                max_fields: current.max_fields.min(limits.max_fields),
                max_responses: current.max_responses.min(limits.max_responses),
                upgrade_on_storage_config: None,
            },
        });
    }

    fallback.unwrap_or(PlanLimits {
        max_forms: Some(0),
        max_fields: 0,
        max_responses: 0,
        upgrade_on_storage_config: None,
    })
}
