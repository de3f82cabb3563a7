use log::{debug, error};
use serde_json::{Map, Value as JsonValue};

use crate::core::{FetchRequest, Fetcher, RouterError, RouterResult};
use crate::query::QueryManager;

/// GET `url` with the current query appended and return its object body.
///
/// Non-success statuses and non-object bodies are errors.
pub async fn fetch_component_data(
    fetcher: &dyn Fetcher,
    query: &QueryManager,
    url: &str,
) -> RouterResult<Map<String, JsonValue>> {
    let query_string = query.build_query_string(&query.get_query_params());
    let full_url = if query_string.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&{query_string}")
    } else {
        format!("{url}?{query_string}")
    };
    debug!("Fetching data from: {full_url}");

    let result = request_object(fetcher, &full_url).await;
    if let Err(e) = &result {
        error!("Failed to fetch component data from {full_url}: {e}");
    }
    result
}

async fn request_object(fetcher: &dyn Fetcher, url: &str) -> RouterResult<Map<String, JsonValue>> {
    let response = fetcher.fetch(FetchRequest::get_json(url)).await?;
    if !response.is_success() {
        return Err(RouterError::http(response.status));
    }
    match response.json()? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(RouterError::Validation(
            "Invalid data format: expected object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::platform::MemoryFetcher;
    use crate::query::params;
    use http::StatusCode;
    use serde_json::json;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn test_appends_current_query() {
        init_log();
        let fetcher = MemoryFetcher::new();
        fetcher.insert_json("/api/user?tab=settings", &json!({ "name": "kim" }));
        let query = QueryManager::new(QueryConfig::default()).unwrap();
        query.set_current_query_params(params([("tab", "settings")]));

        let data = fetch_component_data(&fetcher, &query, "/api/user")
            .await
            .unwrap();
        assert_eq!(data.get("name"), Some(&json!("kim")));

        let request = fetcher.requests().pop().unwrap();
        assert_eq!(request.url, "/api/user?tab=settings");
        assert_eq!(
            request.headers.get(http::header::ACCEPT).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_rejects_status_and_shape() {
        init_log();
        let fetcher = MemoryFetcher::new();
        fetcher.insert_status("/api/down", StatusCode::SERVICE_UNAVAILABLE, "");
        fetcher.insert_json("/api/list", &json!([1, 2, 3]));
        let query = QueryManager::new(QueryConfig::default()).unwrap();

        let err = fetch_component_data(&fetcher, &query, "/api/down")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "HTTP error! status: 503");

        let err = fetch_component_data(&fetcher, &query, "/api/list")
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Validation(_)));

        let err = fetch_component_data(&fetcher, &query, "/api/missing")
            .await
            .unwrap_err();
        assert_eq!(err.display_code(), crate::core::ErrorCode::NotFound);
    }
}
