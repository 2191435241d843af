// # Connection URL Handling
//
// Client URLs have the form `jdbc:ojp[host:port]_<backendUrl>`. The proxy
// strips its own prefix, substitutes `${property}` placeholders from the
// process property set, and hands the native backend URL to the driver
// registry. Unresolved placeholders fail loudly, naming the missing key.

use crate::config::properties::{substitute_with, Properties};
use crate::error::{OjpError, Result};

const OJP_PREFIX: &str = "jdbc:ojp[";

/// Strip the `jdbc:ojp[host:port]_` prefix, returning the embedded backend
/// URL. URLs without the prefix are passed through untouched, so the server
/// accepts both proxied and native forms.
pub fn strip_ojp_prefix(url: &str) -> Result<&str> {
    if let Some(rest) = url.strip_prefix(OJP_PREFIX) {
        let close = rest.find(']').ok_or_else(|| {
            OjpError::Config(format!("malformed OJP URL, missing ']': {}", url))
        })?;
        let after = &rest[close + 1..];
        let backend = after.strip_prefix('_').ok_or_else(|| {
            OjpError::Config(format!("malformed OJP URL, expected '_' after ']': {}", url))
        })?;
        if backend.is_empty() {
            return Err(OjpError::Config(format!("empty backend URL in: {}", url)));
        }
        Ok(backend)
    } else {
        Ok(url)
    }
}

/// Resolve a client URL to the native backend URL: prefix stripping plus
/// placeholder substitution against the given property set.
pub fn resolve_backend_url(url: &str, props: &Properties) -> Result<String> {
    let stripped = strip_ojp_prefix(url)?;
    substitute_with(stripped, props)
}

/// Scheme of a backend URL, used to pick the driver family.
///
/// `jdbc:postgresql://...` and `postgresql://...` both map to `postgresql`;
/// `h2:mem:test` maps to `h2`.
pub fn scheme_of(url: &str) -> &str {
    let url = url.strip_prefix("jdbc:").unwrap_or(url);
    match url.find(':') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Whether the URL carries the XA indicator marking the session as
/// distributed-transaction capable.
pub fn has_xa_indicator(url: &str) -> bool {
    url.split(&['?', ';', '&'][..])
        .skip(1)
        .any(|segment| segment.eq_ignore_ascii_case("xa=true"))
}
