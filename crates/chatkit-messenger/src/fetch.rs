//! HTTP requests executed on behalf of the other side of the boundary.
//!
//! The messenger never talks to the network directly; it goes through an
//! [`HttpFetch`] implementation. [`ReqwestFetcher`] is the production one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chatkit_protocol::{FormData, FormFields, FormValue, RequestParams};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::abort::AbortSignal;
use crate::error::FetchError;

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    /// Multipart body. Cannot be cloned across the boundary as-is; it travels
    /// as a field mapping and is rebuilt on the other side.
    Form(FormData),
}

/// Options for a proxied `fetch`.
#[derive(Debug, Clone, Default)]
pub struct RequestInit {
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    /// Cancels the remote operation when aborted. Never sent as-is.
    pub signal: Option<AbortSignal>,
}

impl RequestInit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    /// JSON body with a matching content type.
    #[must_use]
    pub fn json(self, value: &Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    #[must_use]
    pub fn form(mut self, form: FormData) -> Self {
        self.body = Some(RequestBody::Form(form));
        self
    }

    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Split into what can be cloned across the boundary.
    ///
    /// A form body is drained into its field mapping and the signal is kept
    /// back for the caller to watch.
    #[must_use]
    pub fn into_parts(self) -> (RequestParams, Option<FormFields>, Option<AbortSignal>) {
        let (body, form_data) = match self.body {
            Some(RequestBody::Text(text)) => (Some(text), None),
            Some(RequestBody::Form(form)) => (None, Some(form.to_fields())),
            None => (None, None),
        };
        let params = RequestParams {
            method: self.method,
            headers: self.headers,
            body,
        };
        (params, form_data, self.signal)
    }
}

/// A request ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Rebuild a request from what arrived in a `fetch` message. A present
    /// field mapping becomes a fresh form body and wins over a text body.
    #[must_use]
    pub fn from_params(url: impl Into<String>, params: RequestParams, form_data: Option<FormFields>) -> Self {
        let method = params.method_or_default().to_string();
        let body = form_data
            .map(|fields| RequestBody::Form(FormData::from_fields(fields)))
            .or_else(|| params.body.map(RequestBody::Text));
        Self {
            url: url.into(),
            method,
            headers: params.headers,
            body,
        }
    }

    /// Set a header unless one with the same name is present.
    pub fn default_header(&mut self, name: &str, value: &str) {
        let present = self
            .headers
            .keys()
            .any(|existing| existing.eq_ignore_ascii_case(name));
        if !present {
            self.headers.insert(name.to_string(), value.to_string());
        }
    }
}

/// Streaming response.
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    headers: HashMap<String, String>,
    body: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl HttpResponse {
    /// Response with a streaming body. Header names are matched case-insensitively.
    pub fn new<I, K, V>(
        status: u16,
        status_text: impl Into<String>,
        headers: I,
        body: BoxStream<'static, Result<Bytes, FetchError>>,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            status,
            status_text: status_text.into(),
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.as_ref().to_ascii_lowercase(), value.into()))
                .collect(),
            body,
        }
    }

    /// Response with a body that is already in memory.
    pub fn from_bytes<I, K, V>(
        status: u16,
        status_text: impl Into<String>,
        headers: I,
        body: impl Into<Bytes>,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let body = body.into();
        Self::new(status, status_text, headers, stream::once(async move { Ok(body) }).boxed())
    }

    /// 2xx status.
    #[must_use]
    pub const fn ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body chunks as they arrive.
    #[must_use]
    pub fn into_body(self) -> BoxStream<'static, Result<Bytes, FetchError>> {
        self.body
    }

    /// Read the whole body.
    ///
    /// # Errors
    /// Returns the first chunk error.
    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        let mut body = self.body;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Read the whole body as JSON.
    ///
    /// # Errors
    /// Returns [`FetchError::Body`] when the body cannot be read or is not JSON.
    pub async fn json(self) -> Result<Value, FetchError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::body(e.to_string()))
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Executes HTTP requests.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Send `request`, giving up with [`FetchError::Aborted`] once `signal`
    /// aborts before the response head arrives.
    async fn fetch(&self, request: HttpRequest, signal: AbortSignal) -> Result<HttpResponse, FetchError>;
}

/// [`HttpFetch`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl ReqwestFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    /// Resolve relative request URLs against `base_url`.
    #[must_use]
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    fn resolve(&self, url: &str) -> Result<Url, FetchError> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .as_ref()
                .ok_or_else(|| FetchError::invalid_request(format!("relative url {url} without base")))?
                .join(url)
                .map_err(|e| FetchError::invalid_request(e.to_string())),
            Err(e) => Err(FetchError::invalid_request(format!("{url}: {e}"))),
        }
    }
}

fn multipart_form(form: &FormData) -> Result<Form, FetchError> {
    form.entries().try_fold(Form::new(), |multipart, (name, value)| {
        let name = name.to_string();
        match value {
            FormValue::Text(text) => Ok(multipart.text(name, text.clone())),
            FormValue::File(blob) => {
                let part = Part::bytes(blob.data.clone()).file_name(blob.name.clone());
                let part = if blob.content_type.is_empty() {
                    part
                } else {
                    part.mime_str(&blob.content_type)?
                };
                Ok(multipart.part(name, part))
            }
        }
    })
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn fetch(&self, request: HttpRequest, signal: AbortSignal) -> Result<HttpResponse, FetchError> {
        let url = self.resolve(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::invalid_request(e.to_string()))?;
        debug!(%url, %method, "Sending proxied request");

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match request.body {
            Some(RequestBody::Text(text)) => builder.body(text),
            Some(RequestBody::Form(form)) => builder.multipart(multipart_form(&form)?),
            None => builder,
        };

        let response = tokio::select! {
            biased;
            reason = signal.aborted() => return Err(FetchError::Aborted { reason }),
            response = builder.send() => response?,
        };

        let status = response.status();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FetchError::from))
            .boxed();

        Ok(HttpResponse::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            headers,
            body,
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use chatkit_protocol::FileBlob;
    use serde_json::json;

    #[test]
    fn test_into_parts_moves_form_into_fields() {
        let form = FormData::new().with("purpose", "upload");
        let (params, form_data, signal) = RequestInit::new().method("POST").form(form).into_parts();

        assert_eq!(params.method.as_deref(), Some("POST"));
        assert_eq!(params.body, None);
        assert_eq!(
            form_data.unwrap().get("purpose"),
            Some(&FormValue::from("upload"))
        );
        assert!(signal.is_none());
    }

    #[test]
    fn test_from_params_prefers_form_data() {
        let mut fields = FormFields::new();
        fields.insert(
            "file".to_string(),
            FileBlob::new("a.txt", "text/plain", b"hi".to_vec()).into(),
        );
        let params = RequestParams {
            method: None,
            headers: BTreeMap::new(),
            body: Some("ignored".to_string()),
        };

        let request = HttpRequest::from_params("/upload", params, Some(fields));

        assert_eq!(request.method, "GET");
        assert!(matches!(request.body, Some(RequestBody::Form(form)) if form.len() == 1));
    }

    #[test]
    fn test_default_header_respects_existing_case_insensitively() {
        let mut request = HttpRequest::get("/x");
        request.headers.insert("Accept".to_string(), "application/json".to_string());

        request.default_header("accept", "text/event-stream");
        request.default_header("last-event-id", "7");

        assert_eq!(request.headers.get("Accept").unwrap(), "application/json");
        assert_eq!(request.headers.get("last-event-id").unwrap(), "7");
        assert!(!request.headers.contains_key("accept"));
    }

    #[tokio::test]
    async fn test_response_helpers() {
        let response = HttpResponse::from_bytes(
            404,
            "Not Found",
            [("X-Request-Id", "req_1")],
            r#"{"message":"not found"}"#,
        );

        assert!(!response.ok());
        assert_eq!(response.header("x-request-id"), Some("req_1"));
        assert_eq!(response.json().await.unwrap(), json!({ "message": "not found" }));
    }

    #[test]
    fn test_relative_url_needs_base() {
        let fetcher = ReqwestFetcher::default();
        assert!(matches!(
            fetcher.resolve("/x"),
            Err(FetchError::InvalidRequest { .. })
        ));

        let fetcher = fetcher.with_base_url(Url::parse("https://api.example.com/v1/").unwrap());
        assert_eq!(
            fetcher.resolve("threads").unwrap().as_str(),
            "https://api.example.com/v1/threads"
        );
    }
}
