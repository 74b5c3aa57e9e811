//! Per-request HTTP client over the mixnet

use futures::io::AsyncWriteExt;
use http::header::{self, HeaderMap};
use http::{Method, StatusCode};
use url::Url;

use super::dialer::MixDialer;
use super::http::{encode_request, read_response, HttpResponse};
use super::redirect::{check_redirect, RedirectDecision};
use super::stream::MixStream;
use crate::error::{MixFetchError, Result};
use crate::request::{ParsedRequest, RedirectMode};
use crate::response::FetchResponse;
use crate::runtime::Runtime;

/// HTTP client built for a single fetch.
///
/// Every request, including each redirect hop, gets its own connection.
pub struct MixHttpClient<R> {
    dialer: MixDialer<R>,
    redirect: RedirectMode,
    max_redirections: usize,
}

impl<R: Runtime> MixHttpClient<R> {
    pub fn new(dialer: MixDialer<R>, redirect: RedirectMode, max_redirections: usize) -> Self {
        Self {
            dialer,
            redirect,
            max_redirections,
        }
    }

    /// Run `request` to completion, following redirects as the policy allows.
    pub async fn execute(&self, request: &ParsedRequest) -> Result<FetchResponse> {
        let mut url = request.url().clone();
        let mut method = request.method().clone();
        let mut headers = request.headers().clone();
        let mut body = request.body().map(<[u8]>::to_vec);
        let mut via: Vec<Url> = Vec::new();

        loop {
            let redirected = !via.is_empty();
            let stream = self.dialer.connect(&url).await?;
            let response = exchange(stream, &method, &url, &headers, body.as_deref()).await?;

            let Some(location) = redirect_location(&url, &response)? else {
                return Ok(FetchResponse::new(url, redirected, response));
            };

            via.push(url.clone());
            match check_redirect(self.redirect, &location, &via, self.max_redirections)? {
                RedirectDecision::UseLastResponse => {
                    return Ok(FetchResponse::new(url, redirected, response));
                }
                RedirectDecision::Follow => {}
            }

            if rewrites_to_get(response.status, &method) {
                log::debug!("{} redirect turns {} into GET", response.status, method);
                method = Method::GET;
                body = None;
                for name in [
                    header::CONTENT_TYPE,
                    header::CONTENT_LENGTH,
                    header::CONTENT_ENCODING,
                    header::CONTENT_LANGUAGE,
                    header::CONTENT_LOCATION,
                ] {
                    headers.remove(name);
                }
            }

            log::info!("redirected from {} to {}", url, location);
            url = location;
        }
    }
}

/// Send one request and read its response.
async fn exchange(
    mut stream: MixStream,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    body: Option<&[u8]>,
) -> Result<HttpResponse> {
    let encoded = encode_request(method, url, headers, body);
    stream.write_all(&encoded).await?;
    stream.flush().await?;

    let response = read_response(&mut stream, method).await?;

    if let Err(err) = stream.close().await {
        log::debug!("failed to close connection {}: {}", stream.request_id(), err);
    }
    Ok(response)
}

/// Resolve the `Location` of a redirect response against the current URL.
fn redirect_location(current: &Url, response: &HttpResponse) -> Result<Option<Url>> {
    if !matches!(
        response.status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return Ok(None);
    }

    // a redirect status without a location is just a response
    let Some(location) = response.headers.get(header::LOCATION) else {
        return Ok(None);
    };
    let location = location
        .to_str()
        .map_err(|_| MixFetchError::MalformedResponse("non ASCII Location header".to_string()))?;

    let target = current.join(location)?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(MixFetchError::InvalidUrl(format!(
            "redirect to unsupported scheme '{}'",
            target.scheme()
        )));
    }
    Ok(Some(target))
}

/// Reference: <https://fetch.spec.whatwg.org/#http-redirect-fetch> (step 12)
fn rewrites_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method == Method::POST,
        StatusCode::SEE_OTHER => method != Method::GET && method != Method::HEAD,
        _ => false,
    }
}
