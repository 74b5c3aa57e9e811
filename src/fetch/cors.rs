//! CORS check on completed responses
//!
//! Reference: <https://fetch.spec.whatwg.org/#cors-check>

use http::header::{ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN};
use http::HeaderMap;

use crate::error::{MixFetchError, Result};
use crate::request::CredentialsMode;

const HEADER_ALLOW_ORIGIN: &str = "Access-Control-Allow-Origin";
const WILDCARD: &str = "*";

/// First value of `name`, with an empty value treated as absent.
fn first_value(headers: &HeaderMap, name: &http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .filter(|value| !value.is_empty())
}

/// Check a response against the serialized calling `origin`.
pub fn cors_check(origin: &str, credentials: CredentialsMode, headers: &HeaderMap) -> Result<()> {
    // 1. Let origin be the result of getting `Access-Control-Allow-Origin` from
    //    response's header list.
    // 2. If origin is null, then return failure.
    let allowed = first_value(headers, &ACCESS_CONTROL_ALLOW_ORIGIN)
        .ok_or(MixFetchError::CorsMissingHeader(HEADER_ALLOW_ORIGIN))?;

    let include_credentials = credentials == CredentialsMode::Include;

    // 3. If request's credentials mode is not "include" and origin is `*`, then return success.
    if !include_credentials && allowed == WILDCARD {
        return Ok(());
    }

    // 4. If the result of byte-serializing a request origin with request is not
    //    origin, then return failure.
    if allowed != origin {
        return Err(MixFetchError::CorsOriginMismatch {
            origin: origin.to_string(),
            header_value: allowed,
            header: HEADER_ALLOW_ORIGIN,
        });
    }

    // 5. If request's credentials mode is not "include", then return success.
    if !include_credentials {
        return Ok(());
    }

    // 6. Let credentials be the result of getting
    //    `Access-Control-Allow-Credentials` from response's header list.
    // 7. If credentials is `true`, then return success.
    if first_value(headers, &ACCESS_CONTROL_ALLOW_CREDENTIALS).as_deref() == Some("true") {
        return Ok(());
    }

    // 8. Return failure.
    Err(MixFetchError::CorsCredentials)
}
