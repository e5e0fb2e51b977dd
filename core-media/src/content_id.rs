//! Content identifier extraction for the pinning side channel

use regex::Regex;
use std::sync::OnceLock;

const CID_PATTERN: &str = r"^(Qm[1-9A-HJ-NP-Za-km-z]{44}|b[a-z2-7]{58,}|B[A-Z2-7]{58,}|z[1-9A-HJ-NP-Za-km-z]{48,}|F[0-9A-F]{50,})$";

fn cid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(CID_PATTERN).ok()).as_ref()
}

/// True if `segment` is a CIDv0 or a multibase CIDv1
pub fn is_content_id(segment: &str) -> bool {
    cid_pattern().is_some_and(|pattern| pattern.is_match(segment))
}

/// Find the content identifier in a media URL.
///
/// Returns the identifier followed by whatever path comes after it, e.g.
/// `https://gw.example/ipfs/<cid>/1.png` → `<cid>/1.png`. Query strings and
/// fragments are dropped.
pub fn extract_content_id(url: &str) -> Option<String> {
    let url = url.trim();
    let without_suffix = url.split(['?', '#']).next().unwrap_or(url);

    let path = if let Some(rest) = without_suffix.strip_prefix("ipfs://") {
        rest
    } else if let Some((_, rest)) = without_suffix.split_once("://") {
        // Host labels can carry the identifier too (subdomain gateways)
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        if let Some(label) = host.split('.').next().filter(|label| is_content_id(label)) {
            return Some(join_path(label, path.split('/')));
        }
        path
    } else {
        without_suffix
    };

    let segments: Vec<&str> = path.split('/').collect();
    let position = segments.iter().position(|segment| is_content_id(segment))?;
    Some(join_path(segments[position], segments[position + 1..].iter().copied()))
}

fn join_path<'a>(content_id: &str, rest: impl Iterator<Item = &'a str>) -> String {
    let mut joined = content_id.to_string();
    for segment in rest.filter(|segment| !segment.is_empty()) {
        joined.push('/');
        joined.push_str(segment);
    }
    joined
}
