#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Remote sensing oracle trait and its implementations.
//!
//! The analysis pipeline talks to imagery only through [`Oracle`]. The
//! production implementation is [`earth_engine::EarthEngineOracle`], which
//! forwards every request to the Earth Engine REST API. Tests and offline
//! runs use [`memory::MemoryOracle`], which evaluates the same expressions
//! over a small synthetic pixel grid.

pub mod earth_engine;
pub mod memory;

use async_trait::async_trait;
use sprawl_oracle_models::{
    CompositeHandle, CompositeRequest, ReduceRequest, ReductionResult, ThumbnailRequest,
};

/// Errors raised while talking to an oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// HTTP transport failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Credentials were missing, expired, or rejected.
    #[error("Authentication failed (HTTP {status}): {message}")]
    Auth {
        /// HTTP status code.
        status: u16,
        /// Message returned by the service.
        message: String,
    },

    /// The service refused the request because a quota was exhausted.
    #[error("Quota exceeded: {message}")]
    Quota {
        /// Message returned by the service.
        message: String,
    },

    /// The service failed while handling the request.
    #[error("Server error (HTTP {status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message returned by the service.
        message: String,
    },

    /// The service rejected the request as malformed.
    #[error("Request rejected (HTTP {status}): {message}")]
    Request {
        /// HTTP status code.
        status: u16,
        /// Message returned by the service.
        message: String,
    },

    /// A successful response did not have the expected shape.
    #[error("Unexpected response: {message}")]
    Response {
        /// Description of what was missing or malformed.
        message: String,
    },

    /// A composite handle did not originate from this oracle.
    #[error("Unknown composite: {id}")]
    UnknownComposite {
        /// Handle identifier.
        id: String,
    },

    /// An expression could not be evaluated.
    #[error("Evaluation error: {message}")]
    Evaluation {
        /// Description of what went wrong.
        message: String,
    },

    /// Oracle configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what is missing.
        message: String,
    },
}

impl OracleError {
    /// Maps a non-success HTTP status to the matching error kind.
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Auth { status, message },
            429 => Self::Quota { message },
            500..=599 => Self::Server { status, message },
            _ => Self::Request { status, message },
        }
    }
}

/// A source of composites, zonal reductions, and thumbnails.
///
/// Calls are issued one at a time by the pipeline and every call is a
/// single attempt; implementations must not retry on their own.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Counts the scenes matching a composite query.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] if the query fails.
    async fn image_count(&self, request: &CompositeRequest) -> Result<u64, OracleError>;

    /// Builds a cloud-filtered, clipped composite.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] if the composite cannot be built.
    async fn composite(&self, request: &CompositeRequest) -> Result<CompositeHandle, OracleError>;

    /// Reduces an image expression over a region.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] if the reduction fails.
    async fn reduce(&self, request: &ReduceRequest) -> Result<ReductionResult, OracleError>;

    /// Produces a displayable thumbnail URL.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] if the thumbnail cannot be rendered.
    async fn thumbnail_url(&self, request: &ThumbnailRequest) -> Result<String, OracleError>;
}
