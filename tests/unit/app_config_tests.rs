/*!
 * Tests for application configuration functionality
 */

use parabatch::app_config::{Config, LogLevel, ProviderConfig, TranslationProvider};
use parabatch::translation::OrchestratorOptions;

use crate::common;

/// Test default configuration values
#[test]
fn test_default_config_withNoParameters_shouldHaveCorrectDefaults() {
    let config = Config::default();

    assert_eq!(config.source_language, "en");
    assert_eq!(config.target_language, "fr");
    assert_eq!(config.translation.provider, TranslationProvider::Ollama);
    assert_eq!(config.log_level, LogLevel::Info);
    assert!(config.database_path.is_none());

    let common = &config.translation.common;
    assert_eq!(common.reserved_margin, 1000);
    assert_eq!(common.rate_window_ms, 60_000);
    assert_eq!(common.persist_retry_count, 3);
    assert_eq!(common.persist_retry_backoff_ms, 200);
    assert_eq!(common.progress_persist_interval_ms, 3_000);
    assert_eq!(common.min_sample_interval_ms, 500);
    assert_eq!(common.smoothing_alpha, 0.7);

    assert_eq!(config.translation.available_providers.len(), 4);
    assert!(config.validate().is_ok());
}

/// Test configuration validation
#[test]
fn test_config_validation_withVariousConfigs_shouldValidateCorrectly() {
    let mut config = Config::default();

    config.source_language = "xyz".to_string();
    assert!(config.validate().is_err());
    config.source_language = "en".to_string();

    config.target_language = "".to_string();
    assert!(config.validate().is_err());
    config.target_language = "de".to_string();
    assert!(config.validate().is_ok());

    // Hosted providers need a key
    config.translation.provider = TranslationProvider::OpenAI;
    assert!(config.validate().is_err());
    config.translation.active_provider_config_mut().api_key = "sk-test".to_string();
    assert!(config.validate().is_ok());

    config.translation.common.reserved_margin = config.translation.get_max_context_tokens();
    assert!(config.validate().is_err());
    config.translation.common.reserved_margin = 1000;

    config.translation.common.smoothing_alpha = 1.0;
    assert!(config.validate().is_err());
    config.translation.common.smoothing_alpha = 0.0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaultsThatLoadBack() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("parabatch.json");

    let created = Config::load_or_create(&path).unwrap();
    assert!(path.exists());

    let loaded = Config::load_or_create(&path).unwrap();
    assert_eq!(loaded.target_language, created.target_language);
    assert_eq!(
        loaded.translation.available_providers.len(),
        created.translation.available_providers.len()
    );
}

#[test]
fn test_loadOrCreate_withPartialFile_shouldFillDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(
        dir.path(),
        "parabatch.json",
        r#"{
            "source_language": "en",
            "target_language": "ja",
            "translation": {
                "provider": "anthropic",
                "available_providers": [
                    { "type": "anthropic", "model": "claude-test", "api_key": "key" }
                ]
            }
        }"#,
    )
    .unwrap();

    let config = Config::load_or_create(&path).unwrap();

    assert_eq!(config.translation.provider, TranslationProvider::Anthropic);
    assert_eq!(config.translation.get_model(), "claude-test");
    // Defaults for fields the file leaves out
    assert_eq!(config.translation.get_timeout_secs(), 60);
    assert_eq!(config.translation.get_max_output_tokens(), 4096);
    assert_eq!(config.translation.get_endpoint(), "https://api.anthropic.com");
    assert_eq!(config.translation.common.reserved_margin, 1000);
    assert_eq!(config.log_level, LogLevel::Info);
    assert!(config.validate().is_ok());
}

#[test]
fn test_loadOrCreate_withInvalidJson_shouldFailWithPath() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "broken.json", "{ not json").unwrap();

    let error = Config::load_or_create(&path).unwrap_err();

    assert!(format!("{:#}", error).contains("broken.json"));
}

#[test]
fn test_activeProviderConfigMut_withMissingEntry_shouldCreateFromDefaults() {
    let mut config = Config::default();
    config.translation.available_providers.clear();
    config.translation.provider = TranslationProvider::LMStudio;

    config.translation.active_provider_config_mut().model = "qwen2.5-7b".to_string();

    assert_eq!(config.translation.available_providers.len(), 1);
    assert_eq!(config.translation.get_model(), "qwen2.5-7b");
    assert_eq!(config.translation.get_endpoint(), "http://localhost:1234/v1");
}

#[test]
fn test_providerConfig_new_shouldCarryProviderLimits() {
    let anthropic = ProviderConfig::new(TranslationProvider::Anthropic);
    let ollama = ProviderConfig::new(TranslationProvider::Ollama);

    assert_eq!(anthropic.provider_type, "anthropic");
    assert_eq!(anthropic.rate_limit, Some(45));
    assert_eq!(ollama.rate_limit, None);
    assert!(anthropic.max_context_tokens > ollama.max_context_tokens);
}

#[test]
fn test_translationProvider_parseAndDisplay_shouldRoundTrip() {
    for provider in [
        TranslationProvider::Ollama,
        TranslationProvider::OpenAI,
        TranslationProvider::Anthropic,
        TranslationProvider::LMStudio,
    ] {
        assert_eq!(provider.to_string().parse::<TranslationProvider>().unwrap(), provider);
    }
    assert!("deepl".parse::<TranslationProvider>().is_err());
    assert!(TranslationProvider::OpenAI.requires_api_key());
    assert!(!TranslationProvider::Ollama.requires_api_key());
}

#[test]
fn test_orchestratorOptions_fromConfig_shouldUseActiveProvider() {
    let mut config = Config::default();
    config.target_language = "es".to_string();
    config.translation.provider = TranslationProvider::OpenAI;
    config.translation.common.reserved_margin = 500;

    let options = OrchestratorOptions::from_config(&config);

    assert_eq!(options.target_language, "es");
    assert_eq!(options.model, "gpt-4o-mini");
    assert_eq!(options.max_context_tokens, 16384);
    assert_eq!(options.reserved_margin, 500);
    assert_eq!(options.timeout.as_secs(), 60);
    assert_eq!(options.persist.retry_count, 3);
    assert!(!options.allow_stale_resume);
}
