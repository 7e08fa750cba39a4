use super::*;

#[tokio::test]
async fn state_builds_cache_from_config() {
    let state = test_helpers::test_app_state();
    assert_eq!(state.token_cache.capacity(), crate::config::DEFAULT_SUCCESSFUL_TOKENS_CACHE_SIZE);
    assert_eq!(state.config.port, crate::config::DEFAULT_PORT);
}

#[tokio::test]
async fn zero_cache_size_disables_the_cache() {
    let mut config = test_helpers::test_config();
    config.successful_tokens_cache_size = 0;
    let state = AppState::new(test_helpers::lazy_pool(), config);
    assert!(!state.token_cache.is_enabled());
}

#[tokio::test]
async fn clones_share_the_cache() {
    let state = test_helpers::test_app_state();
    let clone = state.clone();
    clone.token_cache.insert("4c6f36e6cf498e2a448662f915d932c09c5a146c", 1);
    assert_eq!(state.token_cache.get("4c6f36e6cf498e2a448662f915d932c09c5a146c"), Some(1));
}
