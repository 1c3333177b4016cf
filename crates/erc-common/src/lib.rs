//! ---
//! erc_section: "01-core-functionality"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Shared primitives and utilities for the rig controller."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Core shared primitives for the ERC workspace. This crate exposes
//! configuration loading, logging initialisation and time utilities
//! consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, DevicesConfig, LoggingConfig, Mode, SchedulerConfig, SerialDeviceConfig,
    TraceConfig,
};
pub use logging::{init_tracing, LogFormat};
