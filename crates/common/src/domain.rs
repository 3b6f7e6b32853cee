//! Domain name validation
//!
//! Certificates may only be requested for bare domain names. A name carrying a
//! URL scheme (`https://example.com`) is rejected outright, and everything else
//! must survive strict normalization: IDNA to ASCII, DNS label rules, and no
//! IP literals. A single leading wildcard label (`*.example.com`) is allowed.

use url::{Host, Url};

/// Maximum length of a fully qualified name in presentation format
const MAX_NAME_LEN: usize = 253;

/// Maximum length of a single DNS label
const MAX_LABEL_LEN: usize = 63;

/// Wildcard prefix accepted in front of a name
const WILDCARD_PREFIX: &str = "*.";

/// Validate a full domain set.
///
/// Returns `false` for an empty set, and `false` if any single domain fails;
/// there is no partial acceptance.
pub fn valid_domains<S: AsRef<str>>(domains: &[S]) -> bool {
    !domains.is_empty() && domains.iter().all(|d| valid_domain(d.as_ref()))
}

/// Validate one domain name (literal or `*.` wildcard).
pub fn valid_domain(domain: &str) -> bool {
    if has_scheme(domain) {
        return false;
    }

    let name = domain.strip_prefix(WILDCARD_PREFIX).unwrap_or(domain);

    // Host parsing percent-decodes and tolerates some punctuation, so restrict
    // the ASCII alphabet up front. Non-ASCII input is left to IDNA.
    if name
        .chars()
        .any(|c| c.is_ascii() && !(c.is_ascii_alphanumeric() || c == '-' || c == '.'))
    {
        return false;
    }

    match Host::parse(name) {
        Ok(Host::Domain(ascii)) => valid_ascii_name(&ascii),
        _ => false,
    }
}

fn has_scheme(domain: &str) -> bool {
    matches!(Url::parse(domain), Ok(url) if !url.scheme().is_empty())
}

fn valid_ascii_name(name: &str) -> bool {
    if name.len() > MAX_NAME_LEN {
        return false;
    }

    let mut labels = 0usize;
    for label in name.split('.') {
        if !valid_label(label) {
            return false;
        }
        labels += 1;
    }

    labels >= 2
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
