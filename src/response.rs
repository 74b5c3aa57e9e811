//! Fetch responses

use http::{HeaderMap, StatusCode};
use serde::Serialize;
use url::Url;

use crate::network::HttpResponse;

/// The outcome of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    url: Url,
    redirected: bool,
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl FetchResponse {
    pub(crate) fn new(url: Url, redirected: bool, response: HttpResponse) -> Self {
        Self {
            url,
            redirected,
            status: response.status,
            status_text: response.reason,
            headers: response.headers,
            body: response.body,
        }
    }

    /// URL of the request that produced this response
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether at least one redirect was followed
    pub fn redirected(&self) -> bool {
        self.redirected
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Flatten into the shape handed to the host.
    pub fn to_info(&self) -> ResponseInfo {
        ResponseInfo {
            url: self.url.to_string(),
            redirected: self.redirected,
            status: self.status.as_u16(),
            status_text: self.status_text.clone(),
            ok: self.ok(),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
            body: self.body.clone(),
        }
    }
}

/// Serializable response for JS
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    pub url: String,
    pub redirected: bool,
    pub status: u16,
    pub status_text: String,
    pub ok: bool,
    pub headers: Vec<(String, String)>,
    #[serde(serialize_with = "serialize_bytes")]
    pub body: Vec<u8>,
}

/// Emit the body as a byte buffer (`Uint8Array` on the JS side) rather than
/// an array of numbers.
fn serialize_bytes<S: serde::Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bytes(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, CONTENT_TYPE};
    use http::Version;

    #[test]
    fn test_to_info() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let response = FetchResponse::new(
            Url::parse("https://nym.com/final").unwrap(),
            true,
            HttpResponse {
                version: Version::HTTP_11,
                status: StatusCode::NOT_FOUND,
                reason: "Not Found".to_string(),
                headers,
                body: b"missing".to_vec(),
            },
        );

        let info = response.to_info();
        assert_eq!(info.url, "https://nym.com/final");
        assert!(info.redirected);
        assert_eq!(info.status, 404);
        assert!(!info.ok);
        assert_eq!(info.headers, vec![("content-type".to_string(), "text/plain".to_string())]);
        assert_eq!(response.text(), "missing");
    }
}
