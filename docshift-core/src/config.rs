//! Service configuration.
//!
//! [`ServiceConfig`] carries everything a job needs from its environment:
//! where scratch directories live, how large uploads may be, and how to
//! launch the external engines. The API binary fills it from flags and
//! environment variables; tests build it directly.

use crate::error::{ConvertError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// How to launch one external converter process.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalTool {
    /// Executable name or path.
    pub program: String,
    /// Arguments placed before the operation-specific ones.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Hard wall-clock limit; the child is killed when it expires.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl ExternalTool {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            timeout,
        }
    }

    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Parent directory of every per-job scratch directory.
    pub scratch_root: PathBuf,
    /// Overrides the per-operation file size ceiling when set.
    pub max_file_bytes: Option<u64>,
    /// Overrides the per-operation file count ceiling when set.
    pub max_files: Option<usize>,
    /// Upper bound on a whole request body.
    pub request_body_limit: usize,
    /// Office document engine (LibreOffice in headless mode).
    pub office: ExternalTool,
    /// PDF page rasterizer (poppler's `pdftoppm`).
    pub rasterizer: ExternalTool,
    /// How long a handed-off result stays downloadable.
    #[serde(with = "duration_secs")]
    pub result_ttl: Duration,
    /// How often expired handoff results are swept.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("docshift"),
            max_file_bytes: None,
            max_files: None,
            request_body_limit: 1024 * 1024 * 1024 + 1024 * 1024,
            office: ExternalTool::new("soffice", Duration::from_secs(60)),
            rasterizer: ExternalTool::new("pdftoppm", Duration::from_secs(120)),
            result_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ServiceConfig {
    /// Default configuration rooted at `scratch_root`.
    pub fn with_scratch_root(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            ..Self::default()
        }
    }

    /// Directory that holds results waiting to be fetched by token.
    pub fn results_dir(&self) -> PathBuf {
        self.scratch_root.join("results")
    }

    pub fn validate(&self) -> Result<()> {
        for (name, tool) in [("office", &self.office), ("rasterizer", &self.rasterizer)] {
            if tool.program.trim().is_empty() {
                return Err(ConvertError::Config(format!("{name} program must not be empty")));
            }
            if tool.timeout.is_zero() {
                return Err(ConvertError::Config(format!("{name} timeout must be positive")));
            }
        }
        if self.result_ttl.is_zero() {
            return Err(ConvertError::Config("result TTL must be positive".to_string()));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConvertError::Config("sweep interval must be positive".to_string()));
        }
        if self.max_files == Some(0) {
            return Err(ConvertError::Config("max files must be at least 1".to_string()));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
