// src/advisory.rs
// Network-level identity signals cannot be reset locally; this strategy only
// tells the user what to do about them.

use serde::Serialize;
use std::fmt::Write as _;

use crate::error::Result;
use crate::strategy::{ApplyEnv, MutationStrategy};
use crate::types::{MutationResult, PlannedStep};

#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryItem {
    pub title: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Advisory {
    pub product_id: String,
    pub items: Vec<AdvisoryItem>,
}

impl Advisory {
    pub fn for_product(product_id: &str) -> Advisory {
        let item = |title: &str, detail: &str| AdvisoryItem {
            title: title.to_string(),
            detail: detail.to_string(),
        };
        Advisory {
            product_id: product_id.to_string(),
            items: vec![
                item(
                    "Sign out of linked accounts",
                    "Accounts signed in through the IDE tie a fresh installation back to the old one.",
                ),
                item(
                    "Clear browser site data",
                    "Cookies and local storage for the product's web properties outlive a local reset.",
                ),
                item(
                    "Use a separate browser profile",
                    "A clean profile avoids carrying over cached sessions during sign-in.",
                ),
                item(
                    "Network address",
                    "Requests still come from the same public address; nothing local changes that.",
                ),
            ],
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Advisory for {}:", self.product_id);
        for item in &self.items {
            let _ = writeln!(out, "  - {}: {}", item.title, item.detail);
        }
        out
    }
}

pub struct AdvisoryStrategy;

impl MutationStrategy for AdvisoryStrategy {
    fn apply(&self, step: &PlannedStep, env: &mut ApplyEnv) -> Result<MutationResult> {
        env.advisories.push(Advisory::for_product(&step.product_id));
        Ok(MutationResult::default())
    }
}
