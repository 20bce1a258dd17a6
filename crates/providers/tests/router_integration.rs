//! Integration tests for [`LlmRouter`] role resolution and fallback.
//!
//! These exercise the router against a [`ProviderRegistry`] built from a
//! config with no real providers (every provider kind requires network
//! credentials), so they focus on routing decisions that don't require a
//! live HTTP call: missing roles, missing providers, and capability checks.

use std::collections::HashMap;
use va_domain::config::{FallbackConfig, LlmConfig, LlmStartupPolicy, RoleConfig};
use va_providers::registry::ProviderRegistry;
use va_providers::router::{resolve_model, LlmRouter};
use va_providers::traits::ChatRequest;

fn empty_registry() -> ProviderRegistry {
    let config = LlmConfig {
        startup_policy: LlmStartupPolicy::AllowNone,
        ..LlmConfig::default()
    };
    ProviderRegistry::from_config(&config).expect("allow_none startup never errors")
}

#[test]
fn resolve_model_splits_provider_and_model() {
    assert_eq!(
        resolve_model("anthropic/claude-sonnet-4-5-20250514"),
        ("anthropic", "claude-sonnet-4-5-20250514")
    );
}

#[test]
fn resolve_model_without_slash_treats_whole_string_as_provider() {
    assert_eq!(resolve_model("anthropic"), ("anthropic", ""));
}

#[tokio::test]
async fn chat_for_role_errors_when_role_is_unknown() {
    let router = LlmRouter::new(empty_registry(), HashMap::new(), 1_000);
    let result = router.chat_for_role("main", ChatRequest::default()).await;
    let err = result.unwrap_err().to_string();
    assert!(err.contains("no role config for 'main'"), "{err}");
}

#[tokio::test]
async fn chat_for_role_errors_when_provider_and_fallbacks_are_all_missing() {
    let mut roles = HashMap::new();
    roles.insert(
        "main".to_string(),
        RoleConfig {
            model: "anthropic/claude-sonnet-4-5-20250514".to_string(),
            require_tools: false,
            require_json: false,
            require_streaming: false,
            fallbacks: vec![FallbackConfig {
                model: "openai/gpt-4o".to_string(),
                require_tools: false,
                require_json: false,
            }],
        },
    );

    let router = LlmRouter::new(empty_registry(), roles, 1_000);
    let result = router.chat_for_role("main", ChatRequest::default()).await;
    let err = result.unwrap_err().to_string();
    assert!(
        err.contains("all models for role 'main' failed or were unavailable"),
        "{err}"
    );
}

#[test]
fn registry_from_config_with_no_providers_is_empty() {
    let registry = empty_registry();
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
    assert!(registry.init_errors().is_empty());
}

#[test]
fn registry_require_one_with_zero_configured_providers_is_not_an_error() {
    // require_one only rejects the case where providers were configured but
    // all failed to initialize; zero configured providers is a valid (if
    // useless) config and is left to the caller to catch via is_empty().
    let config = LlmConfig {
        startup_policy: LlmStartupPolicy::RequireOne,
        ..LlmConfig::default()
    };
    let registry = ProviderRegistry::from_config(&config).unwrap();
    assert!(registry.is_empty());
}

#[test]
fn registry_require_one_errors_when_all_configured_providers_fail() {
    use va_domain::config::{AuthConfig, ProviderConfig, ProviderKind};

    let config = LlmConfig {
        startup_policy: LlmStartupPolicy::RequireOne,
        providers: vec![ProviderConfig {
            id: "broken".to_string(),
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".to_string(),
            // No auth configured at all: resolve_api_key fails immediately.
            auth: AuthConfig::default(),
            default_model: None,
        }],
        ..LlmConfig::default()
    };

    let err = ProviderRegistry::from_config(&config).unwrap_err();
    assert!(err.to_string().contains("failed to initialize"));
}

#[test]
fn registry_allow_none_tolerates_every_provider_failing() {
    use va_domain::config::{AuthConfig, ProviderConfig, ProviderKind};

    let config = LlmConfig {
        startup_policy: LlmStartupPolicy::AllowNone,
        providers: vec![ProviderConfig {
            id: "broken".to_string(),
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".to_string(),
            auth: AuthConfig::default(),
            default_model: None,
        }],
        ..LlmConfig::default()
    };

    let registry = ProviderRegistry::from_config(&config).unwrap();
    assert!(registry.is_empty());
    assert_eq!(registry.init_errors().len(), 1);
    assert_eq!(registry.init_errors()[0].provider_id, "broken");
}
