//! Intelligence routing for Ninefold.
//!
//! The router takes a natural-language query through the full pipeline:
//! cache probe, analysis, backend selection, parallel dispatch, optional
//! synthesis through the aggregator worker, and cache store. Identical
//! in-flight queries share a single fan-out.

pub mod analyzer;
pub mod cache;
pub mod result;
pub mod router;

pub use analyzer::QueryAnalyzer;
pub use cache::{CacheProbe, ResponseCache};
pub use result::{IndividualResponse, RouteMetadata, RouteOutcome, RouteReply, SynthesisMode};
pub use router::{Router, RouterStats};

/// Cache and single-flight key: SHA-256 digest of the normalised query.
pub fn fingerprint(query: &str) -> String {
    use sha2::{Digest, Sha256};

    let normalised = normalise(query);
    let digest = Sha256::digest(normalised.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Trim, lowercase and collapse inner whitespace so trivially-reformatted
/// queries share a fingerprint.
fn normalise(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
