//! # wow_addon_backup
//!
//! Timestamped backups of World of Warcraft addon and settings folders, with monthly retention
//! and an interval scheduler.
//!
//! ## Features
//!
//! - **Archive engine**: parallel zip compression and extraction with progress callbacks
//! - **Retention**: everything from the last 30 days plus the newest backup of each older month
//! - **Scheduler**: fixed-cadence interval loop driven by live settings, one job at a time
//! - **Safe restore**: archives are checked before any live directory is replaced
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wow_addon_backup::backup::mirror::platform_mirror;
//! use wow_addon_backup::backup::orchestrator::Orchestrator;
//! use wow_addon_backup::backup::settings::JsonSettingsStore;
//!
//! let orchestrator = Orchestrator::new(Arc::new(JsonSettingsStore::new("config.json")), platform_mirror());
//! let job = orchestrator.backup(&|percent: u8, message: &str| println!("{percent}% {message}"))?;
//! println!("{:?}", job.into_result()?.archive);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
