//! scribed: collaborative-editing server daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!              ┌──────────────────────────────────────────────────────┐
//!              │                      SCRIBED                          │
//!              │                                                       │
//!   Clients    │  ┌─────────┐   ┌──────────┐   ┌──────────────────┐   │
//!   ───────────┼─▶│   net   │──▶│ directory│──▶│     storage      │   │
//!              │  │listeners│   │ +registry│   │  (document tree) │   │
//!              │  └────┬────┘   └──────────┘   └──────────────────┘   │
//!              │       │                                               │
//!              │  ┌────▼──────────────────────────────────────────┐   │
//!              │  │                 lifecycle                      │   │
//!              │  │  startup bundle ──▶ running server ──▶ reload  │   │
//!              │  └────┬──────────────────────────────────────────┘   │
//!              │       │                                               │
//!              │  ┌────▼────┐  ┌─────────┐  ┌────────┐  ┌─────────┐  │
//!              │  │security │  │ plugins │  │ tasks  │  │ config  │  │
//!              │  │tls+auth │  │ manager │  │sync/log│  │ loader  │  │
//!              │  └─────────┘  └─────────┘  └────────┘  └─────────┘  │
//!              └──────────────────────────────────────────────────────┘
//! ```
//!
//! The centerpiece is the hot-reload path in [`lifecycle::reload`]: a SIGHUP
//! rebuilds the whole configuration (listeners, TLS credentials, auth
//! context, plugin set, storage root, maintenance tasks) from disk and swaps
//! it into the live server, either completely or not at all.

// Core subsystems
pub mod config;
pub mod directory;
pub mod net;
pub mod storage;

// Configuration generations and the reload transaction
pub mod lifecycle;

// Session-facing services
pub mod plugins;
pub mod security;
pub mod tasks;

// Cross-cutting concerns
pub mod observability;

pub use config::{OptionSources, SecurityPolicy, ServerOptions};
pub use lifecycle::{reload, ReloadError, ServerRun, Shutdown, StartupBundle};
