// src/config/mod.rs

//! Configuration loading and validation for dagkernel.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate references, durations and DAG correctness (`validate.rs`).
//! - Build executors, kernel options and apps from it (`build.rs`).

pub mod build;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::{build_app, build_executors, kernel_options};
pub use loader::{default_config_path, load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    ArgRef, ChannelConfig, ExecutorKind, ExecutorSpec, KernelConfig, KernelSettings,
    ProviderSpec, RawConfigFile, TaskSpec,
};
pub use validate::IMPLICIT_EXECUTOR;
