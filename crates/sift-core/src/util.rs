use url::Url;

use crate::error::AppError;

/// Parse and normalize a request key into an absolute http(s) URL.
///
/// Scheme and host are lowercased by the parser; the fragment is dropped
/// because it never reaches the origin. Empty, relative or non-http(s)
/// input is rejected with [`AppError::InvalidInput`].
pub fn normalize_url(input: &str) -> Result<Url, AppError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("URL must not be empty".into()));
    }

    let mut url = Url::parse(trimmed)
        .map_err(|e| AppError::InvalidInput(format!("Invalid URL '{trimmed}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::InvalidInput(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::InvalidInput(format!("URL '{trimmed}' has no host")));
    }

    url.set_fragment(None);
    Ok(url)
}

/// Resolve an item reference found on a listing against the listing URL.
///
/// Relative links are joined onto `base`. Returns `None` when the reference
/// is blank or does not resolve to an http(s) URL.
pub fn resolve_reference(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }
    let mut resolved = base.join(reference).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}
