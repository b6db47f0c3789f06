// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Alternative binary manager.
//!
//! Altb keeps several versions of the same command line application side by
//! side, and lets the user pick which one answers to the application's name.
//! Each version is a __tag__ of the application, and comes in two kinds:
//!
//! - A __link__ tag points at a binary somewhere on disk, optionally copied
//!   into altb's own versions directory first.
//! - A __command__ tag holds a shell command line, with an optional working
//!   directory and environment overrides.
//!
//! Selecting a tag writes one artifact into the bin directory: a symbolic link
//! for link tags, or a shim script that calls `altb run` for command tags.
//!
//! # Modules
//!
//! - [`config`]: data model of the configuration document.
//! - [`store`]: loading and saving the configuration document.
//! - [`migrate`]: versioned schema migrations of the configuration document.
//! - [`activation`]: tracking, selecting, and removing tags, along with their
//!   artifacts.
//! - [`runner`]: executing command tags.
//! - [`path`]: file system layout and settings.

pub mod activation;
pub mod config;
pub mod migrate;
pub mod path;
pub mod runner;
pub mod store;
