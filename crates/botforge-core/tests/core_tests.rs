//! Tests for botforge-core: ids, configuration validation, settings, errors

use botforge_core::*;
use std::io::Write;

fn support_bot() -> RawConfiguration {
    RawConfiguration {
        name: Some("Support Bot".into()),
        chatbot_type: Some("customer_support".into()),
        ..Default::default()
    }
}

// ===========================================================================
// RunId
// ===========================================================================

#[test]
fn run_id_generate_is_unique() {
    let a = RunId::generate();
    let b = RunId::generate();
    assert_ne!(a, b);
    assert_eq!(a.short().len(), 8);
}

#[test]
fn run_id_from_str_and_display() {
    let id: RunId = "abc".into();
    assert_eq!(id.as_str(), "abc");
    assert_eq!(id.short(), "abc");
    assert_eq!(format!("{}", id), "abc");
}

// ===========================================================================
// RawConfiguration
// ===========================================================================

#[test]
fn raw_defaults_match_factory_defaults() {
    let raw = RawConfiguration::from_json(r#"{"name":"x"}"#).unwrap();
    assert!(raw.enable_rag);
    assert!(raw.enable_memory);
    assert!(raw.enable_function_calling);
    assert!(!raw.enable_web_search);
    assert!(raw.enable_docker);
    assert_eq!(raw.port, 7860);
    assert_eq!(raw.ui_theme, "default");
}

#[test]
fn raw_integration_collects_params() {
    let raw = RawConfiguration::from_json(
        r#"{"integrations":[{"type":"rest_api","name":"Tickets","url":"https://x","retries":3}]}"#,
    )
    .unwrap();
    let integ = &raw.integrations[0];
    assert_eq!(integ.kind.as_deref(), Some("rest_api"));
    assert_eq!(integ.name.as_deref(), Some("Tickets"));
    assert_eq!(integ.params.len(), 2);
}

// ===========================================================================
// Configuration::validate
// ===========================================================================

#[test]
fn validate_support_bot() {
    let config = Configuration::validate(&support_bot()).unwrap();
    assert_eq!(config.name, "Support Bot");
    assert_eq!(config.slug, "support-bot");
    assert_eq!(config.chatbot_type, ChatbotType::CustomerSupport);
    assert!(config.capabilities.rag);
    assert_eq!(config.deployment.port, 7860);
    assert!(config.description.contains("customer support"));
}

#[test]
fn validate_requires_name() {
    let raw = RawConfiguration { name: Some("   ".into()), ..support_bot() };
    let err = Configuration::validate(&raw).unwrap_err();
    assert_eq!(err.field, "name");
}

#[test]
fn validate_rejects_name_without_safe_chars() {
    let raw = RawConfiguration { name: Some("!!!".into()), ..support_bot() };
    let err = Configuration::validate(&raw).unwrap_err();
    assert_eq!(err.field, "name");
}

#[test]
fn validate_rejects_unknown_type() {
    let raw = RawConfiguration { chatbot_type: Some("pirate".into()), ..support_bot() };
    let err = Configuration::validate(&raw).unwrap_err();
    assert_eq!(err.field, "chatbot_type");
    assert!(err.reason.contains("pirate"));
}

#[test]
fn validate_type_is_case_insensitive() {
    let raw = RawConfiguration { chatbot_type: Some("Knowledge_Base".into()), ..support_bot() };
    assert_eq!(
        Configuration::validate(&raw).unwrap().chatbot_type,
        ChatbotType::KnowledgeBase
    );
}

#[test]
fn validate_multi_agent_requires_roles() {
    let raw = RawConfiguration {
        chatbot_type: Some("multi_agent_team".into()),
        ..support_bot()
    };
    let err = Configuration::validate(&raw).unwrap_err();
    assert_eq!(err.field, "agent_roles");
}

#[test]
fn validate_multi_agent_rejects_unknown_role() {
    let raw = RawConfiguration {
        chatbot_type: Some("multi_agent_team".into()),
        agent_roles: vec!["coordinator".into(), "wizard".into()],
        ..support_bot()
    };
    let err = Configuration::validate(&raw).unwrap_err();
    assert_eq!(err.field, "agent_roles[1]");
}

#[test]
fn validate_multi_agent_rejects_two_coordinators() {
    let raw = RawConfiguration {
        chatbot_type: Some("multi_agent_team".into()),
        agent_roles: vec!["coordinator".into(), "Coordinator".into()],
        ..support_bot()
    };
    let err = Configuration::validate(&raw).unwrap_err();
    assert_eq!(err.field, "agent_roles");
    assert!(err.reason.contains("coordinator"));
}

#[test]
fn validate_multi_agent_team() {
    let raw = RawConfiguration {
        chatbot_type: Some("multi_agent_team".into()),
        agent_roles: vec!["coordinator".into(), "researcher".into(), "writer".into()],
        ..support_bot()
    };
    let config = Configuration::validate(&raw).unwrap();
    assert!(config.is_multi_agent());
    assert_eq!(
        config.agent_roles,
        vec![AgentRole::Coordinator, AgentRole::Researcher, AgentRole::Writer]
    );
}

#[test]
fn validate_integration_type_required() {
    let mut raw = support_bot();
    raw.integrations.push(RawIntegration::default());
    let err = Configuration::validate(&raw).unwrap_err();
    assert_eq!(err.field, "integrations[0].type");
}

#[test]
fn validate_integration_params_stringified() {
    let raw = RawConfiguration::from_json(
        r#"{"name":"Bot","chatbot_type":"sales_assistant",
            "integrations":[{"type":"database","url":"postgres://db","pool":4}]}"#,
    )
    .unwrap();
    let config = Configuration::validate(&raw).unwrap();
    let integ = &config.integrations[0];
    assert_eq!(integ.kind, IntegrationKind::Database);
    assert_eq!(integ.name, "database");
    assert_eq!(integ.params["url"], "postgres://db");
    assert_eq!(integ.params["pool"], "4");
}

#[test]
fn validate_rejects_zero_port() {
    let raw = RawConfiguration { port: 0, ..support_bot() };
    assert_eq!(Configuration::validate(&raw).unwrap_err().field, "port");
}

#[test]
fn validate_capabilities_are_independent() {
    for mask in 0u8..16 {
        let raw = RawConfiguration {
            enable_rag: mask & 1 != 0,
            enable_memory: mask & 2 != 0,
            enable_function_calling: mask & 4 != 0,
            enable_web_search: mask & 8 != 0,
            ..support_bot()
        };
        let config = Configuration::validate(&raw).unwrap();
        assert_eq!(config.capabilities.enabled().len(), mask.count_ones() as usize);
    }
}

#[test]
fn validate_normalizes_traits() {
    let raw = RawConfiguration {
        personality_traits: vec!["Friendly".into(), "friendly".into(), " ".into()],
        ..support_bot()
    };
    let config = Configuration::validate(&raw).unwrap();
    assert_eq!(config.personality_traits.len(), 1);
    assert!(config.personality_traits.contains("friendly"));
}

#[test]
fn validation_error_display() {
    let e = ValidationError::new("port", "must be non-zero");
    assert_eq!(e.to_string(), "invalid port: must be non-zero");
}

// ===========================================================================
// FactorySettings
// ===========================================================================

#[test]
fn settings_defaults() {
    let s = FactorySettings::default();
    assert_eq!(s.orchestrator.max_concurrent_runs, 5);
    assert_eq!(s.planner.max_retries, 2);
    assert_eq!(s.backend.api_key_env, "GROQ_API_KEY");
    assert!(s.check().is_ok());
}

#[test]
fn settings_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let s = FactorySettings::load_or_default(&dir.path().join("nope.toml")).unwrap();
    assert_eq!(s.renderer.max_retries, 2);
}

#[test]
fn settings_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("botforge.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "[orchestrator]\nmax_concurrent_runs = 2\n\n[planner]\nmax_retries = 4").unwrap();
    let s = FactorySettings::load_or_default(&path).unwrap();
    assert_eq!(s.orchestrator.max_concurrent_runs, 2);
    assert_eq!(s.orchestrator.finalize_retries, 2);
    assert_eq!(s.planner.max_retries, 4);
    assert_eq!(s.planner.base_delay_ms, 500);
}

#[test]
fn settings_invalid_toml_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("botforge.toml");
    std::fs::write(&path, "[orchestrator\n").unwrap();
    assert!(matches!(
        FactorySettings::load_or_default(&path),
        Err(Error::TomlError(_))
    ));
}

#[test]
fn settings_zero_concurrency_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("botforge.toml");
    std::fs::write(&path, "[orchestrator]\nmax_concurrent_runs = 0\n").unwrap();
    assert!(matches!(
        FactorySettings::load_or_default(&path),
        Err(Error::ConfigError(_))
    ));
}

#[test]
fn settings_toml_roundtrip() {
    let s = FactorySettings::default();
    let text = s.to_toml();
    assert!(text.contains("[orchestrator]"));
    let back: FactorySettings = toml::from_str(&text).unwrap();
    assert_eq!(back.backend.model, s.backend.model);
}
