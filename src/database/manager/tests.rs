use super::*;
use std::time::Duration;

fn name(s: &str) -> StoreName {
    StoreName::parse(s).expect("valid store name")
}

fn config_with_stores(names: &[&str], default: &str) -> Config {
    let mut config = Config::default();
    config.stores.names = names.iter().map(|n| (*n).to_string()).collect();
    config.stores.default = default.to_string();
    config
}

struct FilenameRouter;

impl StoreRouter for FilenameRouter {
    fn route(&self, _content: &str, filename: Option<&str>) -> StoreName {
        match filename {
            Some(f) if f.starts_with("policy") => StoreName::parse("policies").expect("valid store name"),
            _ => StoreName::parse("documents").expect("valid store name"),
        }
    }
}

#[tokio::test]
async fn default_manager_routes_everything_to_documents() {
    let manager = StoreManager::connect(&Config::default()).expect("should build manager");

    assert_eq!(manager.store_names(), &[name("documents")]);
    assert_eq!(manager.resolve_store("Section 5", Some("a.txt")), name("documents"));
    assert_eq!(manager.resolve_store("", None), name("documents"));
    assert_eq!(manager.default_store().name(), &name("documents"));
}

#[tokio::test]
async fn routing_is_deterministic_and_pure() {
    let manager = StoreManager::connect(&config_with_stores(&["documents", "policies"], "documents"))
        .expect("should build manager")
        .with_router(FilenameRouter);

    for _ in 0..3 {
        assert_eq!(manager.resolve_store("text", Some("policy.txt")), name("policies"));
        assert_eq!(manager.resolve_store("text", Some("notes.txt")), name("documents"));
    }
    assert_eq!(
        manager.route_and_get("text", Some("policy.txt")).name(),
        &name("policies")
    );
}

#[tokio::test]
async fn unknown_store_falls_back_to_default() {
    let manager = StoreManager::connect(&config_with_stores(&["documents", "policies"], "policies"))
        .expect("should build manager");

    assert_eq!(manager.get_store("policies").name(), &name("policies"));
    assert_eq!(manager.get_store("missing").name(), &name("policies"));
    assert_eq!(manager.get_store("Not Valid!").name(), &name("policies"));
}

#[tokio::test]
async fn default_must_be_configured() {
    let result = StoreManager::connect(&config_with_stores(&["documents"], "archive"));
    assert!(matches!(result, Err(StoreError::InvalidStoreName(_))));

    let invalid = StoreManager::connect(&config_with_stores(&["Bad-Name"], "documents"));
    assert!(matches!(invalid, Err(StoreError::InvalidStoreName(_))));
}

#[tokio::test]
async fn duplicate_names_are_registered_once() {
    let manager = StoreManager::connect(&config_with_stores(&["documents", "documents"], "documents"))
        .expect("should build manager");
    assert_eq!(manager.store_names().len(), 1);
}

#[tokio::test]
async fn close_all_handles_stores_that_never_connected() {
    let manager = StoreManager::connect(&config_with_stores(&["documents", "policies"], "documents"))
        .expect("should build manager");

    manager.close_all().await;
    assert!(manager.get_store("documents").is_closed());
    assert!(manager.get_store("policies").is_closed());

    manager.close_all().await;
}

#[tokio::test]
async fn initialize_reports_unreachable_database_per_store() {
    let mut config = config_with_stores(&["documents", "policies"], "documents");
    config.database.url = "postgres://nobody@127.0.0.1:1/none".to_string();
    config.database.acquire_timeout_secs = 1;
    config.database.vector_pool.min_connections = 0;
    config.retry.max_attempts = 1;

    let manager = StoreManager::connect(&config)
        .expect("should build manager")
        .with_startup_retry(RetryPolicy::new(2, Duration::from_millis(1), 1.0));

    let reports = manager.initialize_all().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.result.is_err()));
    assert_eq!(reports[0].name, name("documents"));
    assert_eq!(reports[1].name, name("policies"));
}
