// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scanning, incremental refresh, and change watching.

pub mod manager;
pub mod scanner;
pub mod watch;

pub use manager::{IndexManager, RefreshOptions, RefreshReport, RefreshState};
pub use scanner::{FileScanner, ScanOptions, ScannedFile};
