//! Parsed fetch requests and their Fetch-standard options
//!
//! A [`ParsedRequest`] is immutable once built. It is normally produced from a
//! host-side [`RequestInit`], which is where modes that can never be dialed
//! (`navigate`, `websocket`) are rejected.

use std::fmt;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Deserialize;
use url::Url;

use crate::error::{MixFetchError, Result};

/// Correlation key between a dial and its out-of-band mixnet events.
pub type RequestId = u64;

/// Reference: <https://fetch.spec.whatwg.org/#concept-request-mode>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
    Navigate,
    #[serde(rename = "websocket")]
    WebSocket,
}

/// Reference: <https://fetch.spec.whatwg.org/#concept-request-redirect-mode>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectMode {
    #[default]
    Follow,
    Error,
    Manual,
}

/// Reference: <https://fetch.spec.whatwg.org/#concept-request-credentials-mode>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsMode {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Reference: <https://w3c.github.io/webappsec-referrer-policy/#referrer-policies>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferrerPolicy {
    NoReferrer,
    NoReferrerWhenDowngrade,
    SameOrigin,
    Origin,
    StrictOrigin,
    OriginWhenCrossOrigin,
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

/// Reference: <https://fetch.spec.whatwg.org/#concept-request-referrer>
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Referrer {
    NoReferrer,
    #[default]
    Client,
    Url(Url),
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestMode::Cors => "cors",
            RequestMode::NoCors => "no-cors",
            RequestMode::SameOrigin => "same-origin",
            RequestMode::Navigate => "navigate",
            RequestMode::WebSocket => "websocket",
        };
        f.write_str(name)
    }
}

impl fmt::Display for RedirectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RedirectMode::Follow => "follow",
            RedirectMode::Error => "error",
            RedirectMode::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Fetch options carried alongside a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestOptions {
    pub redirect: RedirectMode,
    pub mode: RequestMode,
    pub credentials: CredentialsMode,
    pub referrer_policy: Option<ReferrerPolicy>,
    pub referrer: Referrer,
}

/// A validated fetch call.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    options: RequestOptions,
}

impl ParsedRequest {
    /// Build a request. Only `http` and `https` targets can be dialed.
    pub fn new(
        url: Url,
        method: Method,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
        options: RequestOptions,
    ) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MixFetchError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                url
            )));
        }
        if url.host_str().is_none() {
            return Err(MixFetchError::InvalidUrl(format!("{url} has no host")));
        }
        if matches!(options.mode, RequestMode::Navigate | RequestMode::WebSocket) {
            return Err(MixFetchError::InvalidRequest(format!(
                "request mode '{}' is not supported",
                options.mode
            )));
        }
        Ok(Self {
            url,
            method,
            headers,
            body,
            options,
        })
    }

    /// Plain `GET` with default options.
    pub fn get(url: &str) -> Result<Self> {
        Self::new(
            Url::parse(url)?,
            Method::GET,
            HeaderMap::new(),
            None,
            RequestOptions::default(),
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }
}

/// Request body as handed over by the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<RequestBody> for Vec<u8> {
    fn from(body: RequestBody) -> Self {
        match body {
            RequestBody::Text(text) => text.into_bytes(),
            RequestBody::Bytes(bytes) => bytes,
        }
    }
}

/// Host-side description of a fetch call, mirroring the JS `RequestInit`
/// dictionary plus the target URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInit {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<RequestBody>,
    #[serde(default)]
    pub redirect: RedirectMode,
    #[serde(default)]
    pub mode: RequestMode,
    #[serde(default)]
    pub credentials: CredentialsMode,
    #[serde(default, deserialize_with = "deserialize_referrer_policy")]
    pub referrer_policy: Option<ReferrerPolicy>,
    #[serde(default)]
    pub referrer: Option<String>,
}

/// The empty string is the "no policy" value.
fn deserialize_referrer_policy<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<ReferrerPolicy>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => ReferrerPolicy::deserialize(serde::de::value::StrDeserializer::<
            D::Error,
        >::new(value))
        .map(Some),
    }
}

fn parse_referrer(raw: Option<&str>) -> Result<Referrer> {
    match raw {
        None | Some("about:client") => Ok(Referrer::Client),
        Some("") => Ok(Referrer::NoReferrer),
        Some(url) => Ok(Referrer::Url(Url::parse(url)?)),
    }
}

impl TryFrom<RequestInit> for ParsedRequest {
    type Error = MixFetchError;

    fn try_from(init: RequestInit) -> Result<Self> {
        let url = Url::parse(&init.url)?;

        let method = match init.method.as_deref() {
            None => Method::GET,
            Some(raw) => Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
                .map_err(|_| MixFetchError::InvalidRequest(format!("invalid method '{raw}'")))?,
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &init.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                MixFetchError::InvalidRequest(format!("invalid header name '{name}'"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                MixFetchError::InvalidRequest(format!("invalid value for header '{name}'"))
            })?;
            headers.append(name, value);
        }

        let body: Option<Vec<u8>> = init.body.map(Into::into);
        if body.is_some() && (method == Method::GET || method == Method::HEAD) {
            return Err(MixFetchError::InvalidRequest(format!(
                "request with {method} method cannot have a body"
            )));
        }

        let options = RequestOptions {
            redirect: init.redirect,
            mode: init.mode,
            credentials: init.credentials,
            referrer_policy: init.referrer_policy,
            referrer: parse_referrer(init.referrer.as_deref())?,
        };

        ParsedRequest::new(url, method, headers, body, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(url: &str) -> RequestInit {
        RequestInit {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let req = ParsedRequest::try_from(init("https://nym.com/api")).unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.options().mode, RequestMode::Cors);
        assert_eq!(req.options().redirect, RedirectMode::Follow);
        assert_eq!(req.options().credentials, CredentialsMode::SameOrigin);
        assert_eq!(req.options().referrer, Referrer::Client);
        assert!(req.body().is_none());
    }

    #[test]
    fn test_navigate_and_websocket_rejected() {
        for mode in [RequestMode::Navigate, RequestMode::WebSocket] {
            let mut raw = init("https://nym.com/");
            raw.mode = mode;
            let err = ParsedRequest::try_from(raw).unwrap_err();
            assert!(matches!(err, MixFetchError::InvalidRequest(_)));
        }
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = ParsedRequest::try_from(init("ftp://nym.com/file")).unwrap_err();
        assert!(matches!(err, MixFetchError::InvalidUrl(_)));
    }

    #[test]
    fn test_method_and_headers() {
        let mut raw = init("http://localhost:8080/submit");
        raw.method = Some("post".into());
        raw.headers = vec![("content-type".into(), "text/plain".into())];
        raw.body = Some(RequestBody::Text("hello".into()));

        let req = ParsedRequest::try_from(raw).unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.headers()["content-type"], "text/plain");
        assert_eq!(req.body(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_get_with_body_rejected() {
        let mut raw = init("http://localhost/");
        raw.body = Some(RequestBody::Bytes(vec![1, 2, 3]));
        assert!(ParsedRequest::try_from(raw).is_err());
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut raw = init("http://localhost/");
        raw.headers = vec![("bad header".into(), "x".into())];
        assert!(matches!(
            ParsedRequest::try_from(raw),
            Err(MixFetchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_referrer_parsing() {
        assert_eq!(parse_referrer(Some("")).unwrap(), Referrer::NoReferrer);
        assert_eq!(parse_referrer(Some("about:client")).unwrap(), Referrer::Client);
        assert_eq!(
            parse_referrer(Some("https://nym.com/page")).unwrap(),
            Referrer::Url(Url::parse("https://nym.com/page").unwrap())
        );
    }

    #[test]
    fn test_referrer_policy_deserialization() {
        use serde::de::value::{Error as ValueError, StrDeserializer};

        let policy = ReferrerPolicy::deserialize(StrDeserializer::<ValueError>::new(
            "strict-origin-when-cross-origin",
        ))
        .unwrap();
        assert_eq!(policy, ReferrerPolicy::StrictOriginWhenCrossOrigin);
    }
}
