//! Configuration error type for `boost-kernel`.
//!
//! [`ConfigurationError`] covers every failure that can be detected while the
//! registries are being *built*: malformed path expressions, bad capture
//! patterns, missing model or alias mappings. None of these are recoverable;
//! a deployment that produces one must refuse to start.
//!
//! Runtime conditions (a field missing from one particular search request, an
//! upstream timeout, ...) are not configuration errors and live in their own
//! types ([`NotBoostable`](crate::adapter::NotBoostable) here, the handler
//! errors in `boost-gateway`).

use thiserror::Error;

/// Startup-time configuration error.
///
/// The enum is `#[non_exhaustive]` so new validation rules can be added
/// without breaking downstream `match` arms.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    // ── Path expressions ──────────────────────────────────────────────────
    /// A path expression could not be parsed.
    #[error("invalid path expression '{expression}': {reason}")]
    InvalidPathExpression { expression: String, reason: String },

    /// A capture pattern is not a valid regular expression.
    #[error("invalid capture pattern '{pattern}': {reason}")]
    InvalidCapturePattern { pattern: String, reason: String },

    // ── Backend adapters ──────────────────────────────────────────────────
    /// Two adapters declare the same capture pattern.
    #[error("adapters '{0}' and '{1}' share the capture pattern '{2}'")]
    OverlappingCapture(String, String, String),

    // ── Models ────────────────────────────────────────────────────────────
    /// No class mapping exists for the model identifier.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// A model's implementation has no module namespace registered.
    #[error("model '{model}' uses implementation '{implementation}' which has no module mapping")]
    MissingModule {
        model: String,
        implementation: String,
    },

    /// A model has no artifact URL registered.
    #[error("model '{0}' has no artifact url")]
    MissingArtifactUrl(String),

    /// An alias points at another alias.
    #[error("alias '{alias}' targets '{target}', which is itself an alias")]
    AliasChain { alias: String, target: String },

    /// An alias would hide a canonical identifier.
    #[error("alias '{0}' shadows a canonical model identifier")]
    AliasShadowsModel(String),

    /// A model implementation has no factory compiled into this build.
    #[error("implementation '{0}' is not available in this build")]
    UnavailableImplementation(String),

    // ── Scalar settings ───────────────────────────────────────────────────
    /// A numeric setting is outside its valid range.
    #[error("invalid value for '{0}': {1}")]
    InvalidSetting(&'static str, String),
}

pub type BuildResult<T> = Result<T, ConfigurationError>;
