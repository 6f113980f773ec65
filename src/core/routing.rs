use crate::config::toml_config::RoutingRule;
use crate::domain::model::{Addressee, Recipient};
use std::collections::HashMap;

/// Per-team delivery overrides applied just before sending.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    rules: HashMap<i64, RoutingRule>,
}

impl RoutingTable {
    /// Later rules for the same team replace earlier ones.
    pub fn from_rules(rules: &[RoutingRule]) -> Self {
        Self {
            rules: rules.iter().map(|r| (r.team_code, r.clone())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn route(&self, recipient: &Recipient) -> Addressee {
        let Some(rule) = self.rules.get(&recipient.team_code) else {
            return Addressee::direct(recipient.clone());
        };

        let deliver_to = rule
            .redirect_to
            .clone()
            .unwrap_or_else(|| recipient.address.clone());
        let copy_to: Vec<String> = rule
            .copy_to
            .iter()
            .filter(|cc| **cc != deliver_to)
            .cloned()
            .collect();

        if deliver_to != recipient.address {
            tracing::info!(
                "↪️ Team {}: redirecting {} to {}",
                recipient.team_code,
                recipient.address,
                deliver_to
            );
        }

        Addressee {
            recipient: recipient.clone(),
            deliver_to,
            copy_to,
        }
    }
}
