//! Resolver configuration.
//!
//! A `Config` is passed explicitly into every [`Resolver`](crate::resolver::Resolver).
//! [`Config::global`] is the process-wide default for callers that do not
//! build their own; it is never mutated after first use.

use std::env;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use serde::Serialize;

/// Default page size when a request names none (default: 20).
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Largest page size a request may ask for (default: 1000).
pub const MAX_PAGE_SIZE: u64 = 1000;

/// Maximum sideload nesting depth followed by the resolver (default: 5).
pub const MAX_INCLUDE_DEPTH: u8 = 5;

static GLOBAL: LazyLock<Arc<Config>> = LazyLock::new(|| Arc::new(Config::default()));

/// Pagination and resolution limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Page size used when the request carries no `page[size]`.
    pub default_page_size: u64,

    /// Requests above this size fail with `UnsupportedPageSize`.
    pub max_page_size: u64,

    /// Includes nested deeper than this are skipped with a warning.
    pub max_include_depth: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            max_include_depth: MAX_INCLUDE_DEPTH,
        }
    }
}

impl Config {
    /// Process-wide default configuration.
    pub fn global() -> Arc<Config> {
        GLOBAL.clone()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let default_page_size = env::var("SIDELOAD_DEFAULT_PAGE_SIZE")
            .unwrap_or_else(|_| DEFAULT_PAGE_SIZE.to_string())
            .parse()
            .context("SIDELOAD_DEFAULT_PAGE_SIZE must be a valid u64")?;

        let max_page_size = env::var("SIDELOAD_MAX_PAGE_SIZE")
            .unwrap_or_else(|_| MAX_PAGE_SIZE.to_string())
            .parse()
            .context("SIDELOAD_MAX_PAGE_SIZE must be a valid u64")?;

        let max_include_depth = env::var("SIDELOAD_MAX_INCLUDE_DEPTH")
            .unwrap_or_else(|_| MAX_INCLUDE_DEPTH.to_string())
            .parse()
            .context("SIDELOAD_MAX_INCLUDE_DEPTH must be a valid u8")?;

        let config = Self {
            default_page_size,
            max_page_size,
            max_include_depth,
        };

        if config.default_page_size > config.max_page_size {
            anyhow::bail!(
                "SIDELOAD_DEFAULT_PAGE_SIZE ({}) exceeds SIDELOAD_MAX_PAGE_SIZE ({})",
                config.default_page_size,
                config.max_page_size
            );
        }

        Ok(config)
    }
}
