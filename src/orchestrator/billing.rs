//! Billing Driver: resolves pricing and posts charges for skill calls and LLM turns.
//!
//! Two independent paths share one HTTP sink (`POST {internal_api}/internal/billing/charge`)
//! but never share a failure mode with the user-visible response: every function here swallows
//! its own errors into a `log::warn!` and returns, per the error-handling design's "Billing
//! failure: Logged; never propagates" row.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::cloudllm::client_wrapper::UsageMetadata;
use crate::cloudllm::config::RuntimeConfig;
use crate::cloudllm::http_client_pool::get_or_create_client;
use crate::orchestrator::errors::STANDARDIZED_ERROR_MESSAGE;

/// Lowercased-provider-name aliasing applied before a pricing lookup, so that distinct surface
/// names for the same billable provider collapse onto one pricing record.
fn alias_provider(provider: &str, app_id: Option<&str>) -> String {
    let lower = provider.to_lowercase();
    match (lower.as_str(), app_id) {
        ("brave", _) | ("brave search", _) => "brave".to_string(),
        ("google", Some("maps")) => "google_maps".to_string(),
        (other, _) => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct PricingRecord {
    pub per_unit_credits: Option<u64>,
    pub per_request_credits: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub region: Option<String>,
}

/// Internal config endpoints the billing driver consults before falling back to the minimum
/// charge. A thin wrapper rather than a trait: there is exactly one implementation (the
/// internal HTTP API) and no test double needs to swap it out independently of its base URL.
pub struct InternalConfigClient {
    base_url: String,
    service_token: Option<String>,
    timeout: Duration,
}

impl InternalConfigClient {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            base_url: config.internal_api_base.clone(),
            service_token: config.internal_service_token.clone(),
            timeout: config.internal_http_timeout,
        }
    }

    fn client(&self) -> reqwest::Client {
        get_or_create_client(&self.base_url)
    }

    fn apply_token(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.service_token {
            Some(token) => builder.header("X-Internal-Service-Token", token),
            None => {
                log::warn!("InternalConfigClient: no service token configured, sending unauthenticated request");
                builder
            }
        }
    }

    pub async fn provider_pricing(&self, provider_id: &str) -> Option<PricingRecord> {
        let url = format!("{}/internal/config/provider_pricing/{}", self.base_url, provider_id);
        self.get_pricing(&url).await
    }

    pub async fn provider_model_pricing(&self, provider_id: &str, model_suffix: &str) -> Option<PricingRecord> {
        let url = format!(
            "{}/internal/config/provider_model_pricing/{}/{}",
            self.base_url, provider_id, model_suffix
        );
        self.get_pricing(&url).await
    }

    async fn get_pricing(&self, url: &str) -> Option<PricingRecord> {
        let request = self.apply_token(self.client().get(url)).timeout(self.timeout);
        let response = match request.send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                log::warn!("InternalConfigClient: pricing lookup {} returned {}", url, r.status());
                return None;
            }
            Err(e) => {
                log::warn!("InternalConfigClient: pricing lookup {} failed: {}", url, e);
                return None;
            }
        };
        let body: Value = response.json().await.ok()?;
        Some(PricingRecord {
            per_unit_credits: body.pointer("/per_unit/credits").and_then(|v| v.as_u64()),
            per_request_credits: body.get("per_request_credits").and_then(|v| v.as_u64()),
        })
    }

    pub async fn provider_info(&self, provider_id: &str, model_ref: &str) -> Option<ProviderInfo> {
        let url = format!(
            "{}/internal/config/provider_info/{}?model_ref={}",
            self.base_url,
            provider_id,
            urlencoding::encode(model_ref)
        );
        let request = self.apply_token(self.client().get(&url)).timeout(self.timeout);
        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        Some(ProviderInfo {
            name: body.get("name")?.as_str()?.to_string(),
            region: body.get("region").and_then(|v| v.as_str()).map(String::from),
        })
    }
}

#[derive(Serialize)]
struct ChargeRequest<'a> {
    user_id: &'a str,
    user_id_hash: Option<&'a str>,
    credits: u64,
    skill_id: Option<&'a str>,
    app_id: Option<&'a str>,
    usage_details: Value,
}

async fn post_charge(
    config: &RuntimeConfig,
    user_id: &str,
    user_id_hash: Option<&str>,
    credits: u64,
    skill_id: Option<&str>,
    app_id: Option<&str>,
    usage_details: Value,
) {
    let url = format!("{}/internal/billing/charge", config.internal_api_base);
    let body = ChargeRequest {
        user_id,
        user_id_hash,
        credits,
        skill_id,
        app_id,
        usage_details,
    };
    let client = get_or_create_client(&config.internal_api_base);
    let mut request = client.post(&url).json(&body).timeout(config.internal_http_timeout);
    if let Some(token) = &config.internal_service_token {
        request = request.header("X-Internal-Service-Token", token);
    } else {
        log::warn!("billing::post_charge: no internal service token configured");
    }
    match request.send().await {
        Ok(response) if response.status().is_success() => {}
        Ok(response) => log::warn!("billing::post_charge: charge endpoint returned {}", response.status()),
        Err(e) => log::warn!("billing::post_charge: request failed: {}", e),
    }
}

/// Charge for one successfully executed skill call. Never called for cancelled, all-error, or
/// empty results — callers must check `ToolOutcome::is_billable` first.
pub async fn charge_skill_call(
    config: Arc<RuntimeConfig>,
    internal_config: &InternalConfigClient,
    user_id: &str,
    user_id_hash: Option<&str>,
    app_id: &str,
    skill_id: &str,
    full_model_reference: Option<&str>,
    provider: Option<&str>,
    units_processed: Option<u64>,
    app_yml_pricing: Option<PricingRecord>,
) {
    let pricing = if let Some(p) = app_yml_pricing {
        Some(p)
    } else if let Some(model_ref) = full_model_reference {
        internal_config.provider_model_pricing(provider.unwrap_or("unknown"), model_ref).await
    } else {
        None
    };

    let pricing = match pricing {
        Some(p) => p,
        None => {
            let aliased = provider.map(|p| alias_provider(p, Some(app_id)));
            match &aliased {
                Some(provider_id) => internal_config.provider_pricing(provider_id).await,
                None => None,
            }
            .unwrap_or(PricingRecord {
                per_unit_credits: None,
                per_request_credits: None,
            })
        }
    };

    let units = units_processed.unwrap_or(1);
    let credits = if let Some(per_unit) = pricing.per_unit_credits {
        per_unit * units
    } else if let Some(per_request) = pricing.per_request_credits {
        per_request
    } else {
        config.minimum_credits_charged
    };

    let provider_info = match provider {
        Some(p) => internal_config.provider_info(&alias_provider(p, Some(app_id)), full_model_reference.unwrap_or("")).await,
        None => None,
    };

    let usage_details = serde_json::json!({
        "units_processed": units,
        "provider_name": provider_info.as_ref().map(|p| p.name.clone()),
        "provider_region": provider_info.as_ref().map(|p| p.region.clone()),
    });

    post_charge(&config, user_id, user_id_hash, credits, Some(skill_id), Some(app_id), usage_details).await;
}

/// Charge the fixed minimum credit for a session short-circuited by the harmful/misuse
/// preprocessing gate, where no LLM turn or skill call actually ran.
pub async fn charge_minimum_rejection_credit(
    config: Arc<RuntimeConfig>,
    user_id: &str,
    user_id_hash: Option<&str>,
) {
    let credits = config.minimum_credits_charged;
    post_charge(&config, user_id, user_id_hash, credits, None, None, serde_json::json!({ "reason": "rejected" })).await;
}

/// Per-model credit pricing used for LLM-token billing.
#[derive(Debug, Clone, Copy)]
pub struct TokenPricing {
    pub credits_per_1k_input: f64,
    pub credits_per_1k_output: f64,
}

/// Charge for one completed or user-interrupted LLM turn. Skipped entirely when the aggregated
/// response equals the standardized error string (§8 testable property 8).
pub async fn charge_llm_turn(
    config: Arc<RuntimeConfig>,
    user_id: &str,
    user_id_hash: Option<&str>,
    model_name: &str,
    usage: &UsageMetadata,
    pricing: TokenPricing,
    aggregated_response: &str,
) {
    if aggregated_response == STANDARDIZED_ERROR_MESSAGE {
        return;
    }

    let input_credits = (usage.input_tokens() as f64 / 1000.0) * pricing.credits_per_1k_input;
    let output_credits = (usage.output_tokens() as f64 / 1000.0) * pricing.credits_per_1k_output;
    let credits = (input_credits + output_credits).ceil() as u64;

    let usage_details = serde_json::json!({
        "model_name": model_name,
        "input_tokens": usage.input_tokens(),
        "output_tokens": usage.output_tokens(),
        "total_tokens": usage.total_tokens(),
    });

    post_charge(&config, user_id, user_id_hash, credits.max(config.minimum_credits_charged), None, None, usage_details).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brave_search_aliases_to_brave() {
        assert_eq!(alias_provider("Brave Search", None), "brave");
        assert_eq!(alias_provider("Brave", None), "brave");
    }

    #[test]
    fn google_with_maps_app_aliases_to_google_maps() {
        assert_eq!(alias_provider("Google", Some("maps")), "google_maps");
    }

    #[test]
    fn unrelated_provider_only_lowercases() {
        assert_eq!(alias_provider("OpenAI", None), "openai");
    }
}
