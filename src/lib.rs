//! # Iliad Bridge
//!
//! Intranet bridge to the Iliad document/RAG service.
//!
//! Documents dropped into a watched directory are routed to an Iliad source
//! by their filename, uploaded with bounded concurrency, followed until the
//! vendor finishes processing them, and recorded in a local SQLite ledger.
//! Files that cannot be handled are moved aside for a human to inspect. A
//! small HTTP API exposes source management, manual uploads, RAG chat, and
//! the upload history to the intranet front end.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ auto_upload/ │──▶│   Pipeline   │──▶│ Iliad API   │
//! │   (inbox)    │   │ route+upload │   │ (throttled) │
//! └──────────────┘   └──────┬───────┘   └─────────────┘
//!                           │
//!          ┌────────────────┼────────────────┐
//!          ▼                ▼                ▼
//!   ┌─────────────┐  ┌────────────┐  ┌──────────────┐
//!   │ manual_check│  │  previews/ │  │ SQLite ledger│
//!   └─────────────┘  └────────────┘  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`credentials`] | Fernet-encrypted API key and auth headers |
//! | [`error`] | Typed vendor errors |
//! | [`models`] | Core data types |
//! | [`iliad`] | Vendor HTTP client |
//! | [`throttle`] | Upload limiter and call spacing |
//! | [`traits`] | Document store abstraction |
//! | [`routing`] | Filename to source resolution |
//! | [`inbox`] | Drop directory scanning and quarantine |
//! | [`previews`] | Preview copies and their public URLs |
//! | [`pipeline`] | Auto-upload batch pass |
//! | [`scheduler`] | Periodic background passes |
//! | [`ledger`] | Upload history records |
//! | [`catalog`] | Local source mirror |
//! | [`server`] | Intranet HTTP API |
//! | [`sources`] | CLI source listing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod iliad;
pub mod inbox;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod previews;
pub mod routing;
pub mod scheduler;
pub mod server;
pub mod sources;
pub mod throttle;
pub mod traits;
