//! Redirect policy
//!
//! Reference: <https://fetch.spec.whatwg.org/#http-redirect-fetch>

use url::Url;

use crate::error::{MixFetchError, Result};
use crate::request::RedirectMode;

/// What to do with a redirect response that passed the policy checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Issue a request to the new location
    Follow,
    /// Stop and hand the redirect response itself to the caller
    UseLastResponse,
}

/// Decide whether a redirect to `target` may be followed.
///
/// `via` holds every request made so far, oldest first, including the one
/// that produced the redirect. The hop limit is checked first, then loops,
/// then the mode.
pub fn check_redirect(
    mode: RedirectMode,
    target: &Url,
    via: &[Url],
    max_redirections: usize,
) -> Result<RedirectDecision> {
    // 5. If request's redirect count is 20, then return a network error.
    if via.len() > max_redirections {
        return Err(MixFetchError::RedirectLimit(max_redirections));
    }

    if via.iter().any(|previous| previous.as_str() == target.as_str()) {
        return Err(MixFetchError::RedirectLoop);
    }

    match mode {
        RedirectMode::Error => Err(MixFetchError::RedirectEncountered),
        RedirectMode::Manual => Ok(RedirectDecision::UseLastResponse),
        RedirectMode::Follow => {
            log::debug!("following redirect to {}", target);
            Ok(RedirectDecision::Follow)
        }
    }
}
