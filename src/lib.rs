//! Library to backup directories and databases of remote servers over SSH.
//!
//! A backup task names a source on a remote server and a destination. A run
//! produces an artifact on the remote server (a zip archive or an SQL dump),
//! streams it to the destination and rotates old artifacts there. Runs are
//! driven by [`runner::TaskRunner`], the artifact producers are located in
//! the [`backends`] module and the storage drivers in [`destinations`].

#![forbid(unsafe_code)]

pub mod backends;
pub mod cli;
pub mod config;
pub mod destinations;
pub mod model;
pub mod notify;
pub mod remote;
pub mod runner;
pub mod store;
pub mod util;
