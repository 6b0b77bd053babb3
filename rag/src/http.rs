use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::from_str;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("failed to build HTTP client: {0}")]
    Build(reqwest::Error),

    #[error("invalid header {name}")]
    InvalidHeader { name: String },

    #[error("{method} {url} failed: {source}")]
    Transport {
        method: Method,
        url: String,
        source: reqwest::Error,
    },

    #[error("{method} {url} failed: {status} {body}")]
    Status {
        method: Method,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{method} {url} decode failed: {source} | {body}")]
    Decode {
        method: Method,
        url: String,
        source: serde_json::Error,
        body: String,
    },
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Transport { source, .. } if source.is_timeout())
    }
}

/// Blocking JSON client shared by the provider and vector store adapters.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration, headers: HeaderMap) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(HttpError::Build)?;
        Ok(Self { client })
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        self.send(Method::GET, url, self.client.get(url))
    }

    pub fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        self.send(Method::POST, url, self.client.post(url).json(body))
    }

    pub fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        self.send(Method::PUT, url, self.client.put(url).json(body))
    }

    pub fn delete_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        self.send(Method::DELETE, url, self.client.delete(url))
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T, HttpError> {
        let transport = |source| HttpError::Transport {
            method: method.clone(),
            url: url.to_string(),
            source,
        };
        let resp = request
            .header(CONTENT_TYPE, "application/json")
            .send()
            .map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            // Best effort: the status is the error, the body only adds detail.
            let body = resp.text().unwrap_or_default();
            return Err(HttpError::Status {
                method,
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let text = resp.text().map_err(transport)?;
        from_str::<T>(&text).map_err(|source| HttpError::Decode {
            method,
            url: url.to_string(),
            source,
            body: text,
        })
    }
}

/// `Authorization: Bearer <key>` for OpenAI-compatible APIs.
pub fn bearer_headers(api_key: &str) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())).map_err(|_| {
        HttpError::InvalidHeader {
            name: AUTHORIZATION.to_string(),
        }
    })?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// Single custom header, e.g. Qdrant's `api-key`.
pub fn key_header(name: &'static str, value: &str) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(value.trim()).map_err(|_| HttpError::InvalidHeader {
        name: name.to_string(),
    })?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Serves one canned raw HTTP response and returns the URL to hit.
    fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{}/collections/hr", addr)
    }

    fn client() -> HttpClient {
        HttpClient::new(Duration::from_secs(5), HeaderMap::new()).unwrap()
    }

    #[test]
    fn truncated_success_body_is_a_transport_error() {
        let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"result\"");
        let err = client().get_json::<serde_json::Value>(&url).unwrap_err();
        assert!(matches!(err, HttpError::Transport { .. }), "got {err:?}");
    }

    #[test]
    fn error_status_keeps_body() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nno such x",
        );
        let err = client().get_json::<serde_json::Value>(&url).unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, HttpError::Status { ref body, .. } if body == "no such x"));
    }

    #[test]
    fn success_body_is_decoded() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}",
        );
        let value: serde_json::Value = client().get_json(&url).unwrap();
        assert_eq!(value["ok"], serde_json::json!(true));
    }
}
