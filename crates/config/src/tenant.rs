//! Tenant directory
//!
//! Tenants are keyed by the dialed number. The directory is the canonical
//! source of per-tenant configuration; the `COMPANY_NAME` / `DEFAULT_GREETING`
//! / `TRANSFER_PHONE` / `EMERGENCY_PHONE` environment variables populate the
//! default tenant used when no dialed-number entry matches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which call path a tenant prefers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallPath {
    /// Realtime streaming bridge
    #[default]
    Streaming,
    /// Request/response webhook with speech-gather slots
    TurnBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default = "default_tenant_id")]
    pub id: String,
    #[serde(default = "default_company_name")]
    pub company_name: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_transfer_phone")]
    pub transfer_phone: String,
    #[serde(default = "default_emergency_phone")]
    pub emergency_phone: String,
    #[serde(default)]
    pub path: CallPath,
    /// Extra instructions appended to the rendered system prompt
    #[serde(default)]
    pub prompt_extra: String,
}

fn default_tenant_id() -> String {
    "default".to_string()
}

fn default_company_name() -> String {
    std::env::var("COMPANY_NAME").unwrap_or_else(|_| "Comfort Call HVAC".to_string())
}

fn default_greeting() -> String {
    std::env::var("DEFAULT_GREETING").unwrap_or_else(|_| {
        "Thanks for calling! How can I help with your heating or cooling today?".to_string()
    })
}

fn default_transfer_phone() -> String {
    std::env::var("TRANSFER_PHONE").unwrap_or_default()
}

fn default_emergency_phone() -> String {
    std::env::var("EMERGENCY_PHONE").unwrap_or_default()
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            id: default_tenant_id(),
            company_name: default_company_name(),
            greeting: default_greeting(),
            transfer_phone: default_transfer_phone(),
            emergency_phone: default_emergency_phone(),
            path: CallPath::default(),
            prompt_extra: String::new(),
        }
    }
}

impl TenantConfig {
    /// Render the system prompt sent in the model session configuration
    pub fn render_system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are the phone receptionist for {company}, an HVAC service \
             company. Speak briefly and warmly, one question at a time. Use \
             the provided tools to check availability, book appointments, \
             capture leads, log emergencies, and request transfers. Never \
             invent confirmation numbers; only report what a tool returned. \
             If the caller describes a gas smell, carbon monoxide alarm, or \
             total outage in extreme weather, call log_emergency immediately.",
            company = self.company_name
        );
        if !self.prompt_extra.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.prompt_extra);
        }
        prompt
    }
}

/// All tenants, keyed by dialed number (E.164)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TenantDirectory {
    #[serde(default)]
    pub default: TenantConfig,
    /// dialed number → tenant
    #[serde(default)]
    pub by_dialed: HashMap<String, TenantConfig>,
}

impl TenantDirectory {
    /// Resolve the tenant for a dialed number, falling back to the default
    pub fn resolve(&self, dialed: &str) -> &TenantConfig {
        self.by_dialed.get(dialed).unwrap_or(&self.default)
    }
}
