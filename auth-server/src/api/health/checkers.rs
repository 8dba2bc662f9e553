use super::models::ComponentStatus;
use crate::state::AppState;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::timeout;

pub fn check_store_health<'a>(
    state: &'a AppState,
) -> Pin<Box<dyn Future<Output = ComponentStatus> + Send + 'a>> {
    let tokens = state.tokens.clone();
    Box::pin(async move {
        match tokens.health_check().await {
            Ok(()) => ComponentStatus::ok(None),
            Err(err) => ComponentStatus::error(format!("Store health check failed: {err}")),
        }
    })
}

/// The key set must be loadable and contain the key tokens are signed with
pub fn check_keys_health<'a>(
    state: &'a AppState,
) -> Pin<Box<dyn Future<Output = ComponentStatus> + Send + 'a>> {
    let keys = state.guard.verifier().keys().clone();
    let active_kid = state.keys.active_kid().to_string();
    Box::pin(async move {
        match keys.get().await {
            Ok(set) if set.contains(&active_kid) => ComponentStatus::ok(Some(json!({
                "active_kid": active_kid,
                "published": set.keys.len(),
            }))),
            Ok(_) => ComponentStatus::error(format!(
                "Active key '{active_kid}' is missing from the key set"
            )),
            Err(err) => ComponentStatus::error(format!("Key set unavailable: {err}")),
        }
    })
}

pub async fn run_health_check<F>(
    checker_name: &'static str,
    check_fn: F,
    state: AppState,
) -> ComponentStatus
where
    F: for<'a> FnOnce(&'a AppState) -> Pin<Box<dyn Future<Output = ComponentStatus> + Send + 'a>>
        + Send
        + 'static,
{
    let seconds = state.settings.server.healthcheck_timeout;
    match timeout(Duration::from_secs_f64(seconds), check_fn(&state)).await {
        Ok(status) => status,
        Err(_) => ComponentStatus::error(format!(
            "{checker_name} health check timed out after {seconds} seconds"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::health::models::HealthStatusType;
    use crate::config::Settings;
    use tokio::time::sleep;

    fn state_with_timeout(seconds: f64) -> AppState {
        let mut settings = Settings::for_tests();
        settings.server.healthcheck_timeout = seconds;
        AppState::for_tests(settings)
    }

    #[tokio::test]
    async fn test_run_health_check_successful_within_timeout() {
        fn fast<'a>(
            _state: &'a AppState,
        ) -> Pin<Box<dyn Future<Output = ComponentStatus> + Send + 'a>> {
            Box::pin(async move {
                sleep(Duration::from_millis(20)).await;
                ComponentStatus::ok(None)
            })
        }

        let result = run_health_check("Fast", fast, state_with_timeout(0.5)).await;
        assert_eq!(result.status, HealthStatusType::Ok);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_run_health_check_times_out() {
        fn slow<'a>(
            _state: &'a AppState,
        ) -> Pin<Box<dyn Future<Output = ComponentStatus> + Send + 'a>> {
            Box::pin(async move {
                sleep(Duration::from_millis(300)).await;
                ComponentStatus::ok(None)
            })
        }

        let result = run_health_check("Slow", slow, state_with_timeout(0.1)).await;
        assert_eq!(result.status, HealthStatusType::Error);
        assert_eq!(
            result.error.as_deref(),
            Some("Slow health check timed out after 0.1 seconds")
        );
    }

    #[tokio::test]
    async fn test_store_and_keys_are_healthy() {
        let state = state_with_timeout(1.0);

        let store = run_health_check("Store", check_store_health, state.clone()).await;
        assert!(store.is_ok(), "{:?}", store.error);

        let keys = run_health_check("Keys", check_keys_health, state).await;
        assert!(keys.is_ok(), "{:?}", keys.error);
        assert_eq!(keys.details.unwrap()["active_kid"], "key-2024-01");
    }
}
