#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! trackgw library — the tracker protocol engine and its admin surface.
//!
//! - `protocol` — framing, parsing and encoding of `[tag*id*LLLL*body]` frames
//! - `dispatch` — per-message command handling and acknowledgements
//! - `registry` — live `device_id` → connection sessions
//! - `records` — device contact records and the sink seam
//! - `gateway` — device-facing TCP server
//! - `commands` — operator-initiated commands (`IP`, `TS`, `CR`)
//! - `traffic` — in-memory frame journal
//! - `routes` / `auth` — admin HTTP API
//! - `config` — configuration loading

pub mod auth;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod protocol;
pub mod records;
pub mod registry;
pub mod routes;
pub mod state;
pub mod traffic;

pub use config::Config;
pub use dispatch::Dispatcher;
pub use gateway::Gateway;
pub use registry::SessionRegistry;
pub use state::AppState;
