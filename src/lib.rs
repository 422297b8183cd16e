//! # director-box
//!
//! **Single-container director bootstrap for Docker and Incus**
//!
//! This crate brings up one long-lived director container on a local
//! container runtime, keeps it on the intended image, and reports on it.
//! It owns the container's surroundings (bridge network, persistent
//! volumes, port forwards) but nothing inside the director itself; once the
//! director answers, it is configured through a narrow client trait.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          director-box                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                      Reconciler                             │    │
//! │  │  drift check → prerequisites → start → follow logs → ready  │    │
//! │  │                → cloud-config / stemcell                    │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │            │                    │                      │            │
//! │  ┌─────────▼─────────┐  ┌───────▼────────┐   ┌─────────▼─────────┐  │
//! │  │     Cpi trait     │  │  LogCapture    │   │  Ui / Director    │  │
//! │  │ (+ ImageManaged)  │  │ parse, filter, │   │  client traits    │  │
//! │  └───────┬─────┬─────┘  │  ring buffer   │   └───────────────────┘  │
//! │          │     │        └────────────────┘                          │
//! │  ┌───────▼─┐ ┌─▼────────┐        ┌────────────────────────────┐     │
//! │  │ Docker  │ │  Incus   │        │      ImageResolver         │     │
//! │  │ bollard │ │ REST over│        │ tag→digest, tag search,    │     │
//! │  │         │ │ unix sock│        │ file extraction, diff      │     │
//! │  └─────────┘ └──────────┘        └────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Container Lifecycle
//!
//! ```text
//!   ┌─────────┐   start   ┌─────────┐   stop   ┌─────────┐
//!   │ Absent  │ ────────► │ Running │ ───────► │ Stopped │
//!   └─────────┘           └─────────┘          └────┬────┘
//!        ▲                                          │
//!        └────────────── destroy ◄──────────────────┘
//! ```
//!
//! A stopped container is never restarted in place: the next `start`
//! destroys it and creates a fresh one.
//!
//! # Limits
//!
//! Every network and extraction path is bounded by constants in
//! [`constants`]: `REGISTRY_TIMEOUT`, `MAX_LAYERS`, `MAX_EXTRACTED_FILE_SIZE`,
//! `MAX_TAG_SCAN` and `DEFAULT_READY_TIMEOUT`.
//!
//! # Example
//!
//! ```rust,ignore
//! use director_box::{Config, ConsoleUi, DockerCpi, ImageResolver, OciRegistry, Reconciler};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> director_box::Result<()> {
//!     let config = Config::default();
//!     let resolver = ImageResolver::new(Arc::new(OciRegistry::new()));
//!     let cpi = DockerCpi::connect(config.backend_config()?, resolver)?;
//!
//!     let mut reconciler = Reconciler::new(Arc::new(cpi), Arc::new(ConsoleUi::new()));
//!     reconciler.start(&CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod cpi;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod logs;
pub mod net;

// Re-exports
pub use config::{Config, RuntimeKind};
pub use constants::*;
pub use cpi::{
    BackendConfig, CloudConfig, ContainerInfo, Cpi, DockerCpi, FollowOptions, ImageManaged,
    IncusCpi, LifecycleState, LogTail,
};
pub use error::{Error, Result};
pub use image::{ImageMetadata, ImageReference, ImageResolver, OciRegistry, RegistryTransport};
pub use lifecycle::{
    ConsoleUi, DirectorClient, DirectorConnection, DirectorConnector, Reconciler,
    ReconcilerState, StartOutcome, Ui,
};
pub use logs::{LogBuffer, LogFormat, LogWriter, TeeWriter};
pub use net::Ipv4Subnet;
