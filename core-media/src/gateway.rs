//! # Gateway Resolver
//!
//! Turns untrusted token metadata into one fetchable URL. Resolution is a pure
//! function of its inputs: no I/O, no clock, no randomness.
//!
//! ## Selection
//!
//! The image reference is taken from `metadata.image`, or from
//! `metadata.properties.image` when the former is missing. Either may be:
//!
//! - a string
//! - an object with an `image` string
//! - an object whose `image` object has a `description` starting with
//!   `ipfs://` or `http`
//! - an object with a `description` string
//!
//! Without any image field the token URI is used instead, unless it points
//! at an audio/video container or is the "missing" sentinel.
//!
//! ## Rewriting
//!
//! 1. `ipfs://` and bare `ipfs/` references go through the gateway root
//! 2. Known public gateways are replaced by the gateway root
//! 3. `*.dstor.cloud` browser hosts become `api.dstor.cloud`
//! 4. `<cid>.ipfs.nftstorage.link/<file>` becomes `<root>/<cid>/<file>`
//!
//! Already rewritten URLs pass through unchanged.

use serde_json::Value;
use thiserror::Error;

/// Public gateways whose prefix is replaced by the configured root
pub const PUBLIC_GATEWAYS: &[&str] = &[
    "https://gateway.pinata.cloud/ipfs/",
    "https://nftstorage.link/ipfs/",
    "https://kitchen.mypinata.cloud/ipfs/",
];

/// Sentinel some indexers store when a token has no URI
pub const MISSING_TOKEN_URI: &str = "___MISSING_TOKEN_URI___";

const SUBDOMAIN_GATEWAY_DOMAIN: &str = "nftstorage.link";
const API_HOST_DOMAIN: &str = "dstor.cloud";
const DISALLOWED_EXTENSIONS: &[&str] = &["mp4", "avi", "mpeg"];
const MIN_REFERENCE_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("No usable image reference")]
    NotFound,
}

#[derive(Debug, Clone)]
pub struct GatewayResolver {
    gateway_root: String,
}

impl GatewayResolver {
    pub fn new(gateway_root: impl Into<String>) -> Self {
        let root: String = gateway_root.into();
        Self {
            gateway_root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn gateway_root(&self) -> &str {
        &self.gateway_root
    }

    /// Resolve from the metadata text as stored.
    ///
    /// Text that is not JSON counts as absent metadata. A JSON string that
    /// itself contains a JSON document is unwrapped once.
    pub fn resolve_raw(&self, metadata: &str, token_uri: Option<&str>) -> Result<String, ResolveError> {
        let parsed = match serde_json::from_str::<Value>(metadata) {
            Ok(Value::String(inner)) => serde_json::from_str::<Value>(&inner).ok(),
            Ok(value) => Some(value),
            Err(_) => None,
        };
        self.resolve(parsed.as_ref(), token_uri)
    }

    /// Resolve an image URL from parsed metadata and the token URI fallback
    pub fn resolve(
        &self,
        metadata: Option<&Value>,
        token_uri: Option<&str>,
    ) -> Result<String, ResolveError> {
        let reference = match image_field(metadata) {
            Some(field) => reference_from_field(field),
            None => fallback_token_uri(token_uri),
        }
        .ok_or(ResolveError::NotFound)?;

        if reference.len() < MIN_REFERENCE_LEN {
            return Err(ResolveError::NotFound);
        }

        Ok(self.rewrite(&reference))
    }

    /// Apply the gateway rewriting rules to an already selected reference
    pub fn rewrite(&self, reference: &str) -> String {
        let reference = reference.trim();

        let mut url = if let Some(rest) = reference.strip_prefix("ipfs://") {
            // `ipfs://ipfs/<cid>` is common enough to collapse
            let rest = rest.strip_prefix("ipfs/").unwrap_or(rest);
            format!("{}/{}", self.gateway_root, rest)
        } else if let Some(rest) = reference.strip_prefix("ipfs/") {
            format!("{}/{}", self.gateway_root, rest)
        } else {
            reference.to_string()
        };

        for gateway in PUBLIC_GATEWAYS {
            if let Some(rest) = url.strip_prefix(gateway) {
                url = format!("{}/{}", self.gateway_root, rest);
            }
        }

        let url = rewrite_api_host(&url).unwrap_or(url);
        self.rewrite_subdomain_gateway(&url).unwrap_or(url)
    }

    fn rewrite_subdomain_gateway(&self, url: &str) -> Option<String> {
        let (_, host, path) = split_url(url)?;
        let subdomain = host.strip_suffix(SUBDOMAIN_GATEWAY_DOMAIN)?.strip_suffix('.')?;
        let content_id = subdomain.split('.').next().filter(|label| !label.is_empty())?;
        let segment = path
            .trim_start_matches('/')
            .split('/')
            .next()
            .filter(|segment| !segment.is_empty())?;
        Some(format!("{}/{}/{}", self.gateway_root, content_id, segment))
    }
}

fn image_field(metadata: Option<&Value>) -> Option<&Value> {
    let metadata = metadata?.as_object()?;
    metadata
        .get("image")
        .filter(|value| is_present(value))
        .or_else(|| {
            metadata
                .get("properties")
                .and_then(|properties| properties.get("image"))
                .filter(|value| is_present(value))
        })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn reference_from_field(field: &Value) -> Option<String> {
    let reference = match field {
        Value::String(s) => Some(s.as_str()),
        Value::Object(object) => match object.get("image") {
            Some(Value::String(image)) => Some(image.as_str()),
            nested => nested
                .and_then(|image| image.get("description"))
                .and_then(Value::as_str)
                .filter(|description| {
                    description.starts_with("ipfs://") || description.starts_with("http")
                })
                .or_else(|| object.get("description").and_then(Value::as_str)),
        },
        _ => None,
    }?;

    let trimmed = reference.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn fallback_token_uri(token_uri: Option<&str>) -> Option<String> {
    let uri = token_uri?.trim();
    if uri.is_empty() || uri == MISSING_TOKEN_URI {
        return None;
    }

    let extension = uri.rsplit('.').next().unwrap_or_default();
    if DISALLOWED_EXTENSIONS
        .iter()
        .any(|disallowed| extension.eq_ignore_ascii_case(disallowed))
    {
        return None;
    }

    Some(uri.to_string())
}

/// `*.dstor.cloud` → `api.dstor.cloud`
fn rewrite_api_host(url: &str) -> Option<String> {
    let (scheme, host, path) = split_url(url)?;
    let subdomain = host.strip_suffix(API_HOST_DOMAIN)?.strip_suffix('.')?;
    if subdomain.is_empty() {
        return None;
    }
    let rest = subdomain.split_once('.').map(|(_, rest)| rest);
    let host = match rest {
        Some(rest) => format!("api.{}.{}", rest, API_HOST_DOMAIN),
        None => format!("api.{}", API_HOST_DOMAIN),
    };
    Some(format!("{}://{}{}", scheme, host, path))
}

/// `(scheme, host, path-with-leading-slash)`
fn split_url(url: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = url.split_once("://")?;
    let split = rest.find('/').unwrap_or(rest.len());
    let (host, path) = rest.split_at(split);
    Some((scheme, host, path))
}
