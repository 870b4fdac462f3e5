//! Authenticated REST calls against the coordination server, grounded on the
//! teacher's size-capped-download pattern: every response body is read
//! through an explicit byte cap rather than trusting `Content-Length`.

use serde_json::Value;

use crate::errors::{EdgeError, Result};

const MAX_DOWNLOAD_BYTES: usize = 50 * 1024 * 1024;

pub struct ApiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `GET /api/v1/apikey/validate`. `Ok(true)` means the key is good,
    /// `Ok(false)` means the server rejected it, either outright (401/403)
    /// or via a 200 body carrying `{"valid": false}`; any other failure
    /// (network, 5xx) surfaces as `Err` so the caller can distinguish
    /// "invalid" from "couldn't find out".
    pub async fn validate_api_key(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.url("/api/v1/apikey/validate"))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Ok(false),
            status if status.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| EdgeError::Http(format!("validate response was not valid json: {e}")))?;
                Ok(body.get("valid").and_then(Value::as_bool).unwrap_or(true))
            }
            status => Err(EdgeError::Http(format!("unexpected status {status}"))),
        }
    }

    /// `PATCH /api/v1/edges/<edge_id>` with the outbound delta of the local
    /// config record.
    pub async fn patch_edge(&self, edge_id: &str, delta: &Value) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/api/v1/edges/{edge_id}")))
            .header("x-api-key", &self.api_key)
            .json(delta)
            .send()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EdgeError::Http(format!("PATCH edge failed: {}", response.status())));
        }
        Ok(())
    }

    /// `GET /api/v1/files/<attachment_id>`, capped at 50MiB.
    pub async fn get_file(&self, attachment_id: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/files/{attachment_id}")))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))?;
        limited_text(response).await
    }

    /// `GET /api/v1/todos/<todo_id>`.
    pub async fn get_todo(&self, todo_id: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/todos/{todo_id}")))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))?;
        limited_text(response).await
    }

    /// `POST /api/v1/resources/register` as multipart form data.
    pub async fn register_attachment(&self, path: &str, bytes: Vec<u8>) -> Result<Value> {
        let file_name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("/api/v1/resources/register"))
            .header("x-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EdgeError::Http(format!(
                "register_attachment failed: {}",
                response.status()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))
    }
}

/// Read the body as text, erroring rather than buffering past the cap.
async fn limited_text(response: reqwest::Response) -> Result<String> {
    let bytes = limited_bytes(response).await?;
    String::from_utf8(bytes).map_err(|e| EdgeError::Http(format!("response body was not utf-8: {e}")))
}

async fn limited_bytes(response: reqwest::Response) -> Result<Vec<u8>> {
    use futures_util::StreamExt;

    if !response.status().is_success() {
        return Err(EdgeError::Http(format!("request failed: {}", response.status())));
    }
    if let Some(len) = response.content_length()
        && len as usize > MAX_DOWNLOAD_BYTES
    {
        return Err(EdgeError::Http(format!(
            "response of {len} bytes exceeds the {MAX_DOWNLOAD_BYTES} byte cap"
        )));
    }

    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| EdgeError::Http(e.to_string()))?;
        if buf.len() + chunk.len() > MAX_DOWNLOAD_BYTES {
            return Err(EdgeError::Http(format!(
                "response exceeded the {MAX_DOWNLOAD_BYTES} byte cap mid-stream"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn validate_api_key_true_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/apikey/validate"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"valid": true})))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri(), "secret");
        assert!(client.validate_api_key().await.unwrap());
    }

    #[tokio::test]
    async fn validate_api_key_false_on_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/apikey/validate"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri(), "bad-key");
        assert!(!client.validate_api_key().await.unwrap());
    }

    #[tokio::test]
    async fn validate_api_key_false_on_200_with_valid_false_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/apikey/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"valid": false})))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri(), "stale-key");
        assert!(!client.validate_api_key().await.unwrap());
    }

    #[tokio::test]
    async fn get_file_returns_body_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/files/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("file contents"))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri(), "secret");
        let body = client.get_file("abc").await.unwrap();
        assert_eq!(body, "file contents");
    }

    #[tokio::test]
    async fn get_file_errors_on_server_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/files/missing"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri(), "secret");
        assert!(client.get_file("missing").await.is_err());
    }
}
