use crate::error::FetchError;
use crate::sources::{Endpoint, JsonSource};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

const USER_AGENT: &str = "dtuwidget";

/// [`JsonSource`] backed by `reqwest`, with HTTP Basic credentials.
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn request(&self, endpoint: &Endpoint) -> Result<Value, FetchError> {
        let mut request = self
            .client
            .get(&endpoint.url)
            .timeout(endpoint.timeout)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);

        if !endpoint.query.is_empty() {
            request = request.query(&endpoint.query);
        }
        if !endpoint.user.is_empty() {
            request = request.basic_auth(&endpoint.user, Some(&endpoint.pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(e, endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| classify(e, endpoint))
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(err: reqwest::Error, endpoint: &Endpoint) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(endpoint.timeout.as_millis() as u64)
    } else {
        FetchError::from(err)
    }
}

#[async_trait]
impl JsonSource for HttpSource {
    async fn get_json(&self, endpoint: &Endpoint) -> Result<Value, FetchError> {
        debug!(url = %endpoint.url, "fetching");
        let result = self.request(endpoint).await;
        if let Err(e) = &result {
            warn!(url = %endpoint.url, "could not fetch data: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::DEFAULT_TIMEOUT;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn endpoint(url: String) -> Endpoint {
        Endpoint {
            url,
            user: "admin".to_string(),
            pass: "secret".to_string(),
            query: vec![("inv".to_string(), "114182912345".to_string())],
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[tokio::test]
    async fn test_get_json_sends_auth_and_serial() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/livedata/status")
            .match_query(Matcher::UrlEncoded(
                "inv".to_string(),
                "114182912345".to_string(),
            ))
            .match_header("authorization", "Basic YWRtaW46c2VjcmV0")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"inverters": []}).to_string())
            .create_async()
            .await;

        let source = HttpSource::new();
        let value = source
            .get_json(&endpoint(format!("{}/api/livedata/status", server.url())))
            .await
            .unwrap();

        assert_eq!(value, json!({"inverters": []}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_is_appended_to_existing_one() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/cm")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("cmnd".to_string(), "status 8".to_string()),
                Matcher::UrlEncoded("inv".to_string(), "114182912345".to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"StatusSNS": {}}"#)
            .create_async()
            .await;

        let source = HttpSource::new();
        let result = source
            .get_json(&endpoint(format!("{}/cm?cmnd=status%208", server.url())))
            .await;

        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_is_status_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/livedata/status")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let source = HttpSource::new();
        let result = source
            .get_json(&endpoint(format!("{}/api/livedata/status", server.url())))
            .await;

        assert!(matches!(result, Err(FetchError::Status { status: 401, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_json_is_decode_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/livedata/status")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>login</html>")
            .create_async()
            .await;

        let source = HttpSource::new();
        let result = source
            .get_json(&endpoint(format!("{}/api/livedata/status", server.url())))
            .await;

        assert!(matches!(result, Err(ref e) if e.is_decode()));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let source = HttpSource::new();
        let result = source
            .get_json(&endpoint("http://127.0.0.1:1/api/livedata/status".to_string()))
            .await;

        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
