//! precis-core - Core library for Précis cloud sync
//!
//! This crate contains the replicated data models, the merge engine, the
//! settings conflict resolver, the OAuth token lifecycle, the remote and
//! local store adapters and the sync orchestrator used by every Précis
//! front end.

pub mod auth;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod error;
pub mod merge;
pub mod models;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;
pub mod util;

pub use auth::{AuthorizationPrompt, HttpOAuthClient, OAuthBackend, TokenManager};
pub use clock::{Clock, SystemClock};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use models::{ItemKind, SyncSession, SyncedItem};
pub use remote::{DriveDocumentStore, RemoteDocumentStore};
pub use session::{SessionPersistence, SessionState};
pub use store::{LocalStore, SqliteLocalStore};
pub use sync::{SyncCommand, SyncComponents, SyncOutcome, SyncService};
