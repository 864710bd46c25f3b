//! Outbound HTTP for api-backed tools.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BoxError;
use crate::tool::HttpMethod;

/// A fully built request for an api-backed tool.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Raw response. `body` is the undecoded response text.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends [`HttpRequest`]s. Swappable so tests can stub the network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BoxError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_is_success() {
        let ok = HttpResponse {
            status: 204,
            body: String::new(),
        };
        let err = HttpResponse {
            status: 404,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!err.is_success());
    }

    #[tokio::test]
    async fn test_reqwest_transport_sends_json_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("x-api-key", "secret"))
            .and(body_json(json!({"q": "rust"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("X-API-Key".to_string(), "secret".to_string());
        let response = ReqwestTransport::new()
            .send(HttpRequest {
                url: format!("{}/echo", server.uri()),
                method: HttpMethod::Post,
                headers,
                body: Some(json!({"q": "rust"})),
            })
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_reqwest_transport_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let response = ReqwestTransport::new()
            .send(HttpRequest {
                url: server.uri(),
                method: HttpMethod::Get,
                headers: BTreeMap::new(),
                body: None,
            })
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(response.body, "boom");
        assert!(!response.is_success());
    }
}
