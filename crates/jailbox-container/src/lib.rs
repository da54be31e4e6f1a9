//! # jailbox-container
//!
//! Lifecycle management for a single container backed by a FreeBSD jail.
//!
//! This crate provides:
//!
//! - Container lifecycle (create, start, run, exec, signal, destroy)
//! - Status reconciliation against live host queries
//! - Exec fifo readiness handshake with the jail's init process
//! - Persisted container state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   Factory                    │
//! │  - create / load by id                       │
//! └─────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌─────────────────────────────────────────────┐
//! │                  Container                   │
//! │  - lock-serialized lifecycle operations      │
//! │  - reconcile: jls + init identity + fifo     │
//! └─────────────────────────────────────────────┘
//!          │                          │
//!          ▼                          ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │   JailBackend    │      │    ExecFifo      │
//! │ jail/jls/jexec/ps│      │ <rootfs>/exec.fifo│
//! └──────────────────┘      └──────────────────┘
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod factory;
pub mod fifo;
pub mod identity;
pub mod process;
pub mod state;
pub mod status;

pub use backend::{JailBackend, JailCommandBackend, LaunchRequest, SignalTarget};
pub use config::{Config, IdMap, RuntimeConfig};
pub use container::Container;
pub use error::{ContainerError, Result};
pub use factory::Factory;
pub use identity::IdentityToken;
pub use process::InitSpec;
pub use state::State;
pub use status::ContainerStatus;

/// Signal type accepted by [`Container::signal`].
pub use nix::sys::signal::Signal;
