//! Error types for the X-Ray creator.
//!
//! Uses `thiserror` for structured error definitions that provide
//! clear context about what went wrong.

use thiserror::Error;

/// Errors raised while reading or rewriting a packed book container.
#[derive(Error, Debug)]
pub enum PatchError {
    /// Failed to read or write the container file
    #[error("Failed to access book container: {0}")]
    Io(#[from] std::io::Error),

    /// The container is not a `BOOKMOBI` file
    #[error("Setting ASIN only supported for MOBI files of type 'BOOK'; this is a '{found}' file")]
    FormatMismatch { found: String },

    /// The container has no EXTH table to replace
    #[error("No existing EXTH record. Cannot update ASIN")]
    MissingTable,

    /// Header fields point outside the file or are otherwise inconsistent
    #[error("Malformed book container: {0}")]
    Malformed(String),

    /// The container uses a feature this crate does not read
    #[error("Unsupported book container: {0}")]
    Unsupported(String),
}

/// Errors raised by remote lookups.
#[derive(Error, Debug)]
pub enum LookupError {
    /// Transport failure that survived the reconnect attempt
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The page content says the page does not exist
    #[error("Page not found: {0}")]
    PageNotFound(String),

    /// A redirect had no usable target
    #[error("Invalid redirect from {0}")]
    InvalidRedirect(String),

    /// Redirect chain exceeded the configured bound
    #[error("Too many redirects while fetching {0}")]
    TooManyRedirects(String),

    /// URL parsing or joining failed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Failure of a single pipeline stage for one book.
#[derive(Error, Debug)]
pub enum StageError {
    /// No usable identifier from the catalog, the container or a remote search
    #[error("could not find ASIN or ASIN is invalid")]
    IdentifierNotFound,

    /// No remote book page was found for the identifier
    #[error("no remote book URL found")]
    RemoteUrlNotFound,

    /// A stage ran before the data it needs was produced
    #[error("{0} is not available yet")]
    MissingPrerequisite(&'static str),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// Failure surfaced by an index builder collaborator
    #[error("{0:#}")]
    Collaborator(anyhow::Error),

    /// Copying the index artifact to the device failed
    #[error("could not copy X-Ray to device: {0}")]
    Copy(#[from] std::io::Error),
}

/// Errors raised while looking for an attached device.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No attached e-reader was found
    #[error("No Kindle connected")]
    NotFound,

    /// Volume enumeration failed
    #[error("Failed to enumerate volumes: {0}")]
    Enumeration(#[from] std::io::Error),
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Error type for catalog files.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Failed to read catalog file
    #[error("Failed to read catalog: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse catalog TOML
    #[error("Failed to parse catalog: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
