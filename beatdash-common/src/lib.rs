//! # Beatdash Common Library
//!
//! Core of the deck history dashboard, shared by the server binary:
//! - Track-change detection over polled deck snapshots
//! - History admission (replay guard) and batch clean
//! - Session store with synchronously maintained aggregates
//! - CSV / JSON / TXT export and play analytics
//! - Key-value persistence adapters and write-behind persistence
//! - Event bus, configuration and settings

pub mod analytics;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod export;
pub mod history;
pub mod models;
pub mod sessions;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use history::{AdmissionPolicy, Reconciler};
pub use models::{Candidate, Session, SessionStats, TrackEvent};
pub use sessions::SessionStore;
