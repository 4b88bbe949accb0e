use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use reqwest::{
    header::{self, HeaderValue},
    Method,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    retry::AttemptFailure, ClientError, ClientOptions, FetchOptions, GraphQlError, LogSink,
    ReqwestTransport, RequestOptions, RequestSpec, ResponseContext, Result, RetryingTransport,
    Transport, TransportResponse,
};

/// Hook invoked once per logical request, right before the first attempt.
///
/// Changes made to the options are seen by every retry of that request.
/// Closures of the form `Fn(&str, &mut FetchOptions)` implement it.
pub trait PreFetch: Send + Sync {
    fn pre_fetch(&self, url: &str, options: &mut FetchOptions);
}

impl<F> PreFetch for F
where
    F: Fn(&str, &mut FetchOptions) + Send + Sync,
{
    fn pre_fetch(&self, url: &str, options: &mut FetchOptions) {
        self(url, options)
    }
}

/// HTTP client with a base url, default options, retries and error classification.
///
/// Clones share the transport, configuration and access token.
pub struct ApiClient<T = ReqwestTransport> {
    retrying: RetryingTransport<Arc<T>>,
    options: ClientOptions,
    pre_fetch: Option<Arc<dyn PreFetch>>,
    authorization: Arc<RwLock<Option<HeaderValue>>>,
}

impl<T> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            retrying: self.retrying.clone(),
            options: self.options.clone(),
            pre_fetch: self.pre_fetch.clone(),
            authorization: Arc::clone(&self.authorization),
        }
    }
}

impl<T> fmt::Debug for ApiClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let authorised = self
            .authorization
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("ApiClient")
            .field("options", &self.options)
            .field("pre_fetch", &self.pre_fetch.is_some())
            .field("access_token", &authorised.then_some("<redacted>"))
            .finish()
    }
}

impl ApiClient<ReqwestTransport> {
    /// Creates a client over the default `reqwest` transport.
    pub fn new(options: ClientOptions) -> Self {
        let transport = ReqwestTransport::new(options.timeout_ms);
        Self::with_transport(options, transport)
    }

    /// Creates a client from environment variables.
    ///
    /// Reads the variables documented on [`ClientOptions::from_env`], plus
    /// `API_CLIENT_TOKEN` which, when set and non-empty, is passed to
    /// [`ApiClient::authorise`].
    pub fn from_env() -> Result<Self> {
        let client = Self::new(ClientOptions::from_env()?);
        if let Ok(token) = std::env::var("API_CLIENT_TOKEN") {
            if !token.trim().is_empty() {
                client.authorise(Some(&token))?;
            }
        }
        Ok(client)
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn with_transport(options: ClientOptions, transport: T) -> Self {
        Self {
            retrying: RetryingTransport::new(Arc::new(transport)),
            options,
            pre_fetch: None,
            authorization: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_log(mut self, log: LogSink) -> Self {
        self.retrying = self.retrying.with_log(log);
        self
    }

    pub fn with_pre_fetch(mut self, hook: impl PreFetch + 'static) -> Self {
        self.pre_fetch = Some(Arc::new(hook));
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        self.retrying.transport()
    }

    /// Stores an access token sent as `Authorization: Bearer <token>` on every
    /// later request that has no explicit authorization header.
    ///
    /// `None` leaves the current token untouched.
    pub fn authorise(&self, token: Option<&str>) -> Result<()> {
        let Some(token) = token else {
            return Ok(());
        };
        let mut value = HeaderValue::from_str(&normalize_bearer_authorization(token))
            .map_err(|err| ClientError::Config(format!("invalid access token: {err}")))?;
        value.set_sensitive(true);
        *self
            .authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }

    /// Sends `base_url + path` and returns the first 2xx response.
    ///
    /// Non-2xx responses and transport errors are retried per the call's
    /// schedule, falling back to the client default, then classified into
    /// [`ClientError`].
    pub async fn fetch(&self, path: &str, options: RequestOptions) -> Result<TransportResponse> {
        options.validate()?;
        let mut fetch_options = self.options.fetch_options.clone().merged_with(&options);
        if !fetch_options.has_authorization() {
            if let Some(value) = self.current_authorization() {
                fetch_options.headers.insert(header::AUTHORIZATION, value);
            }
        }

        let url = format!("{}{}", self.options.base_url, path);
        if !options.skip_pre_fetch {
            if let Some(hook) = &self.pre_fetch {
                hook.pre_fetch(&url, &mut fetch_options);
            }
        }

        let request = RequestSpec::new(url, fetch_options);
        let schedule = options
            .retry_after
            .as_ref()
            .unwrap_or(&self.options.retry_after);
        let outcome = self
            .retrying
            .execute(&request, schedule, options.cancel.as_ref())
            .await;

        outcome.map_err(|failure| classify_failure(request, failure))
    }

    /// Fetches and decodes the body as JSON. Decode failures are not retried.
    pub async fn fetch_json<R: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<R> {
        let response = self.fetch(path, options).await?;
        Ok(response.json()?)
    }

    pub async fn fetch_text(&self, path: &str, options: RequestOptions) -> Result<String> {
        let response = self.fetch(path, options).await?;
        Ok(response.text())
    }

    /// POSTs `{query, variables}` as JSON and returns the decoded body.
    ///
    /// A body with a non-empty `errors` field fails with
    /// [`ClientError::GraphQl`] even though the HTTP status was 2xx.
    pub async fn graphql<V: Serialize>(
        &self,
        url: &str,
        query: &str,
        variables: V,
    ) -> Result<JsonValue> {
        let options = RequestOptions::new()
            .method(Method::POST)
            .json(&GraphQlRequest { query, variables })?;
        let body: JsonValue = self.fetch_json(url, options).await?;
        if has_graphql_errors(&body) {
            return Err(GraphQlError { body }.into());
        }
        Ok(body)
    }

    fn current_authorization(&self) -> Option<HeaderValue> {
        self.authorization
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Serialize)]
struct GraphQlRequest<'a, V> {
    query: &'a str,
    variables: V,
}

fn has_graphql_errors(body: &JsonValue) -> bool {
    match body.get("errors") {
        Some(JsonValue::Array(errors)) => !errors.is_empty(),
        Some(JsonValue::Object(errors)) => !errors.is_empty(),
        Some(JsonValue::String(errors)) => !errors.is_empty(),
        Some(JsonValue::Bool(flag)) => *flag,
        Some(JsonValue::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        None | Some(JsonValue::Null) => false,
    }
}

fn classify_failure(request: RequestSpec, failure: AttemptFailure) -> ClientError {
    let request = Box::new(request);
    match failure {
        AttemptFailure::Transport(source) => ClientError::Transport { request, source },
        AttemptFailure::Status(response) => ClientError::Http {
            request,
            response: Box::new(ResponseContext {
                status: response.status,
                status_text: response.status_text.clone(),
                body: response.text(),
                headers: response.headers,
            }),
        },
        AttemptFailure::ReadBody(source) => ClientError::ReadBody { request, source },
        AttemptFailure::Cancelled => ClientError::Cancelled { request },
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::{header, StatusCode};
    use serde_json::json;

    use super::{has_graphql_errors, normalize_bearer_authorization, ApiClient};
    use crate::{
        ClientOptions, ErrorKind, FetchOptions, RequestOptions, RequestSpec, Transport,
        TransportError, TransportErrorKind, TransportResponse,
    };

    /// Records every request and answers from a fixed closure.
    struct RecordingTransport {
        seen: Mutex<Vec<RequestSpec>>,
        respond: fn(&RequestSpec) -> Result<TransportResponse, TransportError>,
    }

    impl RecordingTransport {
        fn new(respond: fn(&RequestSpec) -> Result<TransportResponse, TransportError>) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                respond,
            }
        }

        fn seen(&self) -> Vec<RequestSpec> {
            self.seen.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: &RequestSpec) -> Result<TransportResponse, TransportError> {
            self.seen.lock().expect("lock").push(request.clone());
            (self.respond)(request)
        }
    }

    fn ok_json(request: &RequestSpec) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse::new(
            request.url.clone(),
            StatusCode::OK,
            r#"{"id":1}"#,
        ))
    }

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn debug_redacts_access_token() {
        let client = ApiClient::with_transport(
            ClientOptions::default(),
            RecordingTransport::new(ok_json),
        );
        client.authorise(Some("secret-token")).expect("valid token");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn graphql_error_detection() {
        assert!(!has_graphql_errors(&json!({"data": {}})));
        assert!(!has_graphql_errors(&json!({"data": {}, "errors": null})));
        assert!(!has_graphql_errors(&json!({"data": {}, "errors": []})));
        assert!(has_graphql_errors(&json!({"errors": [{"message": "x"}]})));
    }

    #[test]
    fn graphql_falsy_errors_are_not_errors() {
        for errors in [json!(false), json!(""), json!(0), json!({})] {
            assert!(!has_graphql_errors(&json!({"data": {}, "errors": errors})));
        }
        assert!(has_graphql_errors(&json!({"errors": "unauthorised"})));
        assert!(has_graphql_errors(&json!({"errors": {"message": "x"}})));
        assert!(has_graphql_errors(&json!({"errors": true})));
    }

    #[tokio::test]
    async fn invalid_explicit_authorization_is_never_replaced_by_stored_token() {
        let client = ApiClient::with_transport(
            ClientOptions::default(),
            RecordingTransport::new(ok_json),
        );
        client.authorise(Some("stored")).expect("valid token");

        let err = client
            .fetch("/x", RequestOptions::new().bearer("explicit\ntoken"))
            .await
            .expect_err("invalid header must fail the call");

        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("authorization"));
        assert!(client.transport().seen().is_empty());
    }

    #[tokio::test]
    async fn base_url_is_concatenated_literally() {
        let client = ApiClient::with_transport(
            ClientOptions::default().base_url("https://x.test/"),
            RecordingTransport::new(ok_json),
        );

        client
            .fetch("/todos/1", RequestOptions::new())
            .await
            .expect("must succeed");

        assert_eq!(client.transport().seen()[0].url, "https://x.test//todos/1");
    }

    #[tokio::test]
    async fn authorise_injects_bearer_unless_explicit() {
        let client = ApiClient::with_transport(
            ClientOptions::default(),
            RecordingTransport::new(ok_json),
        );
        client.authorise(Some("tok")).expect("valid token");
        client.authorise(None).expect("no-op");

        client.fetch("/a", RequestOptions::new()).await.expect("ok");
        client
            .fetch("/b", RequestOptions::new().header("Authorization", "Basic xyz"))
            .await
            .expect("ok");

        let seen = client.transport().seen();
        assert_eq!(seen[0].options.headers[header::AUTHORIZATION], "Bearer tok");
        assert_eq!(seen[1].options.headers[header::AUTHORIZATION], "Basic xyz");
    }

    #[tokio::test]
    async fn pre_fetch_runs_unless_skipped() {
        let client = ApiClient::with_transport(
            ClientOptions::default(),
            RecordingTransport::new(ok_json),
        )
        .with_pre_fetch(|url: &str, options: &mut FetchOptions| {
            let value = format!("signed:{url}").parse().expect("valid header");
            options.headers.insert("x-signed", value);
        });

        client.fetch("/a", RequestOptions::new()).await.expect("ok");
        client
            .fetch("/b", RequestOptions::new().skip_pre_fetch())
            .await
            .expect("ok");

        let seen = client.transport().seen();
        assert_eq!(seen[0].options.headers["x-signed"], "signed:/a");
        assert!(!seen[1].options.headers.contains_key("x-signed"));
    }

    #[tokio::test]
    async fn dns_failure_surfaces_as_transport_exception() {
        let client = ApiClient::with_transport(
            ClientOptions::default().base_url("https://registry.invalid"),
            RecordingTransport::new(|_| {
                Err(TransportError::new(
                    TransportErrorKind::Connect,
                    "getaddrinfo ENOTFOUND registry.invalid",
                ))
            }),
        );

        let err = client
            .fetch("/", RequestOptions::new())
            .await
            .expect_err("must fail");

        assert_eq!(err.kind(), ErrorKind::TransportException);
        assert!(err.to_string().to_lowercase().contains("failed to fetch"));
        assert!(err.response().is_none());
        let cause = std::error::Error::source(&err).expect("cause");
        assert!(cause.to_string().contains("ENOTFOUND"));
        assert_eq!(client.transport().seen().len(), 1);
    }

    #[tokio::test]
    async fn fetch_json_decode_failure_is_not_reclassified() {
        let client = ApiClient::with_transport(
            ClientOptions::default(),
            RecordingTransport::new(|request| {
                Ok(TransportResponse::new(
                    request.url.clone(),
                    StatusCode::OK,
                    "not json",
                ))
            }),
        );

        let err = client
            .fetch_json::<serde_json::Value>("/", RequestOptions::new().retry_after([1, 1]))
            .await
            .expect_err("must fail to decode");

        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(client.transport().seen().len(), 1);
    }

    #[tokio::test]
    async fn graphql_posts_json_envelope() {
        let client = ApiClient::with_transport(
            ClientOptions::default(),
            RecordingTransport::new(|request| {
                Ok(TransportResponse::new(
                    request.url.clone(),
                    StatusCode::OK,
                    r#"{"data":{"viewer":{"login":"kit"}}}"#,
                ))
            }),
        );

        let body = client
            .graphql(
                "https://api.x.test/graphql",
                "query { viewer { login } }",
                json!({"first": 1}),
            )
            .await
            .expect("graphql must succeed");

        assert_eq!(body["data"]["viewer"]["login"], "kit");
        let seen = client.transport().seen();
        assert_eq!(seen[0].options.method, reqwest::Method::POST);
        assert_eq!(seen[0].options.headers[header::CONTENT_TYPE], "application/json");
        let sent: serde_json::Value =
            serde_json::from_slice(seen[0].options.body.as_deref().expect("body")).expect("json");
        assert_eq!(
            sent,
            json!({"query": "query { viewer { login } }", "variables": {"first": 1}})
        );
    }
}
