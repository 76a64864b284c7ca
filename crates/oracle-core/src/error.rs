use thiserror::Error;

/// Error kinds shared across the oracle network crates.
///
/// Propagation policy: infrastructure errors (`Transport`, `Storage`) are
/// recovered locally by the caller's own retry loop; semantic errors
/// (`Parse`, `UnknownSigner`, `UnknownHash`) are dropped by the message
/// handler that produced them; `Config` and fatal `UnsupportedType` errors
/// are surfaced as startup or request failures. Nothing in this enum is
/// meant to crash a running process on a per-message basis.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Malformed JSON, malformed hex, or a signature of the wrong length.
    #[error("parse error: {0}")]
    Parse(String),

    /// A recovered signer address is not a member of the trusted set.
    #[error("unknown signer: {0}")]
    UnknownSigner(String),

    /// A `sign_response` arrived for a hash with no pending entry.
    #[error("unknown hash: {0}")]
    UnknownHash(String),

    /// The underlying KV store failed a read or write.
    #[error("storage error: {0}")]
    Storage(String),

    /// A publish or subscription-read operation failed or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or invalid startup configuration. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every configured price source failed to produce a value this tick.
    #[error("no price available")]
    NoPriceAvailable,

    /// The data structure schema references a solidity type the packed
    /// encoder does not know how to encode. Fatal for that request.
    #[error("unsupported solidity type: {0}")]
    UnsupportedType(String),
}

pub type Result<T> = std::result::Result<T, OracleError>;
