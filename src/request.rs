use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{ClientError, RetrySchedule};

/// Final options of a request, as seen by the transport and the pre-fetch hook.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchOptions {
    pub method: Method,
    /// Header names are case-normalized by [`HeaderMap`].
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

impl FetchOptions {
    /// Overlays `other` on top of `self`.
    ///
    /// Headers merge per key with `other` winning on collision. Method and body
    /// are replaced only when `other` sets them.
    pub(crate) fn merged_with(mut self, other: &RequestOptions) -> Self {
        if let Some(method) = &other.method {
            self.method = method.clone();
        }
        overlay_headers(&mut self.headers, &other.headers);
        if let Some(body) = &other.body {
            self.body = Some(body.clone());
        }
        self
    }

    pub(crate) fn has_authorization(&self) -> bool {
        self.headers.contains_key(header::AUTHORIZATION)
    }
}

/// Replaces every key of `layer` in `base`, keeping all of its values.
fn overlay_headers(base: &mut HeaderMap, layer: &HeaderMap) {
    for name in layer.keys() {
        base.remove(name);
        for value in layer.get_all(name) {
            base.append(name.clone(), value.clone());
        }
    }
}

/// A fully resolved request: absolute url plus final options.
///
/// Also carried by [`crate::ClientError`] as the request context.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestSpec {
    pub url: String,
    pub options: FetchOptions,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>, options: FetchOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }
}

/// Per-call options accepted by [`crate::ApiClient::fetch`] and friends.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Skips the client's pre-fetch hook for this call.
    pub skip_pre_fetch: bool,
    /// Replaces the client's default retry schedule for this call.
    pub retry_after: Option<RetrySchedule>,
    /// Caller-owned cancellation handle, checked between attempts.
    pub cancel: Option<CancellationToken>,
    /// First header rejected by [`RequestOptions::header`]; fails the call.
    invalid_header: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets a header, replacing earlier values for the same name.
    ///
    /// An invalid name or value makes the request fail with
    /// [`crate::ClientError::Config`] before any attempt is made.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| format!("invalid header name '{name}': {err}"))
            .and_then(|parsed| {
                HeaderValue::from_str(value)
                    .map(|value| (parsed, value))
                    .map_err(|err| format!("invalid value for header '{name}': {err}"))
            });
        match parsed {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(reason) => {
                self.invalid_header.get_or_insert(reason);
            }
        }
        self
    }

    /// Overlays `headers`, keeping every value of multi-valued names.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        overlay_headers(&mut self.headers, &headers);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON body and sets `content-type: application/json`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> serde_json::Result<Self> {
        self.body = Some(serde_json::to_vec(value)?);
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }

    /// Sets an explicit `Authorization: Bearer <token>` header for this call.
    pub fn bearer(self, token: &str) -> Self {
        let value = format!("Bearer {}", token.trim());
        self.header(header::AUTHORIZATION.as_str(), &value)
    }

    pub fn skip_pre_fetch(mut self) -> Self {
        self.skip_pre_fetch = true;
        self
    }

    pub fn retry_after(mut self, schedule: impl Into<RetrySchedule>) -> Self {
        self.retry_after = Some(schedule.into());
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        match &self.invalid_header {
            Some(reason) => Err(ClientError::Config(reason.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{
        header::{self, HeaderMap},
        Method,
    };

    use super::{FetchOptions, RequestOptions};
    use crate::ErrorKind;

    #[test]
    fn call_time_headers_override_defaults_per_key() {
        let mut defaults = FetchOptions::default();
        defaults
            .headers
            .insert("x-team", "core".parse().expect("valid header"));
        defaults
            .headers
            .insert("accept", "text/plain".parse().expect("valid header"));

        let merged = defaults.merged_with(
            &RequestOptions::new()
                .method(Method::PUT)
                .header("Accept", "application/json"),
        );

        assert_eq!(merged.method, Method::PUT);
        assert_eq!(merged.headers["accept"], "application/json");
        assert_eq!(merged.headers["x-team"], "core");
    }

    #[test]
    fn merge_keeps_default_body_when_call_sets_none() {
        let defaults = FetchOptions {
            body: Some(b"default".to_vec()),
            ..FetchOptions::default()
        };
        let merged = defaults.merged_with(&RequestOptions::new());
        assert_eq!(merged.body.as_deref(), Some(&b"default"[..]));
        assert_eq!(merged.method, Method::GET);
    }

    #[test]
    fn json_sets_body_and_content_type() {
        let options = RequestOptions::new()
            .json(&serde_json::json!({"a": 1}))
            .expect("serializable");
        assert_eq!(options.body.as_deref(), Some(&br#"{"a":1}"#[..]));
        assert_eq!(options.headers[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn invalid_header_fails_validation() {
        let options = RequestOptions::new()
            .header("bad header", "x")
            .header("x-ok", "1")
            .bearer("explicit\ntoken");
        let err = options.validate().expect_err("invalid header must be reported");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("bad header"));
        assert!(RequestOptions::new().header("x-ok", "1").validate().is_ok());
    }

    #[test]
    fn multi_valued_headers_survive_merge() {
        let mut defaults = FetchOptions::default();
        defaults
            .headers
            .insert("accept", "text/plain".parse().expect("valid header"));
        let mut call = HeaderMap::new();
        call.append("accept", "application/json".parse().expect("valid header"));
        call.append("accept", "text/csv".parse().expect("valid header"));

        let merged = defaults.merged_with(&RequestOptions::new().headers(call));

        let accept: Vec<_> = merged.headers.get_all("accept").iter().collect();
        assert_eq!(accept, vec!["application/json", "text/csv"]);
    }

    #[test]
    fn bearer_sets_authorization() {
        let options = RequestOptions::new().bearer(" abc ");
        assert_eq!(options.headers[header::AUTHORIZATION], "Bearer abc");
    }
}
