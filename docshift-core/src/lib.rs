//! # docshift
//!
//! The per-job pipeline behind the docshift conversion service.
//!
//! Every conversion request becomes a [`ConversionJob`]: it owns a uniquely
//! named scratch directory, records every file it writes there, hands its
//! inputs to the [`Dispatcher`] for the requested [`Operation`], packages
//! the outputs with [`package`], and finally sweeps everything it created.
//!
//! ## Features
//!
//! - **Scratch workspaces**: one directory per job, idempotent teardown
//! - **Upload validation**: size/count ceilings and strict format checks
//! - **Operations**: merge, compress, PDF to JPG/PNG, images to PDF, image
//!   format conversion, Word to PDF, PDF to Word
//! - **Bounded subprocesses**: external engines run under a hard timeout
//! - **Packaging**: single file passthrough or deterministic zip archives
//! - **Result handoff**: one-shot download tokens with expiry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docshift::{package, ConversionJob, ConversionRequest, Dispatcher, Operation, ServiceConfig};
//! use std::collections::BTreeMap;
//!
//! # async fn run() -> docshift::Result<()> {
//! let config = ServiceConfig::default();
//! let dispatcher = Dispatcher::new(config.clone());
//!
//! let mut job = ConversionJob::create(&config.scratch_root, Operation::Merge).await?;
//! // ... stage uploads into the job ...
//! dispatcher.validate(&mut job)?;
//! let request = ConversionRequest::from_fields(Operation::Merge, &BTreeMap::new())?;
//! dispatcher.convert(&mut job, &request).await?;
//! let result = package(&mut job).await?;
//! println!("{} ({})", result.download_name, result.content_type);
//! job.cleanup();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod options;
pub mod package;
pub mod page_range;
pub mod preview;
pub mod process;
pub mod results;
pub mod upload;
pub mod workspace;

pub use config::{ExternalTool, ServiceConfig};
pub use convert::{ConversionReport, Dispatcher, Operation, PreviewKind};
pub use error::{ConvertError, ErrorCategory, Result};
pub use job::{ConversionJob, JobId, JobState, OutputFile};
pub use options::ConversionRequest;
pub use package::{package, PackagedResult};
pub use page_range::{PageSelection, ResolvedPages};
pub use preview::{preview, Preview};
pub use results::{HandoffTicket, ResultStore, StoredResult};
pub use upload::{FileKind, ImageFormat, UploadLimits, UploadedFile};
pub use workspace::ScratchDir;
