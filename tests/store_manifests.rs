//! Manifest loading and the rate-limit service configuration derived from it.

mod common;

use quotaplane::store::{InMemoryStore, ResourceStore};
use quotaplane::{Error, Result};

#[tokio::test]
async fn loads_policies_and_routes() -> Result<()> {
    let store = InMemoryStore::from_yaml(common::MANIFESTS)?;

    let policies = store.list_quota_policies().await?;
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0].identity(), "6f1c2a");

    let route = store.get_gateway_route("default", "chat").await?;
    assert_eq!(route.spec.rules.len(), 2);

    let missing = store.get_gateway_route("default", "nope").await.unwrap_err();
    assert!(missing.is_not_found());
    Ok(())
}

#[test]
fn malformed_document_is_a_serialization_error() {
    let err = InMemoryStore::from_yaml("kind: QuotaPolicy\nmetadata: [not, a, map]\n").unwrap_err();
    assert!(matches!(err, Error::Serialization { .. }));
}

#[tokio::test]
async fn rate_limit_service_config_matches_manifests() -> Result<()> {
    let translator = common::translator();
    let config = translator.rate_limit_service_config().await?;
    let yaml = config.to_yaml()?;

    let expected = r#"domain: ai-gateway-quota
descriptors:
- key: backend_name
  value: default/my-backend
  descriptors:
  - key: model_name_override
    value: gpt-4
    descriptors:
    - key: rule-gpt-4-0-match-0
      value: rule-gpt-4-0-match-0
      rate_limit:
        unit: minute
        requests_per_unit: 100
    - key: rule-gpt-4-1-match--1
      value: rule-gpt-4-1-match--1
      rate_limit:
        unit: minute
        requests_per_unit: 10
"#;
    assert_eq!(yaml, expected);
    Ok(())
}

#[tokio::test]
async fn empty_store_gives_empty_service_config() -> Result<()> {
    let translator = quotaplane::QuotaTranslator::new(InMemoryStore::new(), quotaplane::Settings::default())?;
    assert!(translator.rate_limit_service_config().await?.is_empty());
    Ok(())
}
