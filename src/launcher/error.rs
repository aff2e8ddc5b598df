//! Two-tier launcher errors.
//!
//! [`SetupError`] is returned to the caller: the host process is still
//! intact and can decide what to do next. [`LaunchError`] is only ever
//! turned into a diagnostic followed by process exit, since by then the
//! process has started giving up its directory, identity and streams.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::fetcher::FetchError;
use crate::identity::IdentityError;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to determine current directory: {0}")]
    CurrentDirectory(#[source] io::Error),

    #[error("failed to change ownership of working directory: {0}")]
    WorkDirectoryOwnership(#[source] IdentityError),

    #[error("failed to enter working directory {}: {source}", path.display())]
    EnterDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to fetch executor resources: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to return to original directory {}: {source}", path.display())]
    RestoreDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to enter working directory {}: {source}", path.display())]
    DirectoryEntryFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to switch to user {user} for executor {executor_id} of framework {framework_id}: {source}")]
    PrivilegeSwitchFailed {
        user: String,
        executor_id: String,
        framework_id: String,
        #[source]
        source: IdentityError,
    },

    #[error("failed to redirect {stream}: {source}")]
    IoRedirectFailed {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to start '{command}': {source}")]
    ForkFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("could not execute '/bin/sh -c {command}': {source}")]
    ExecFailed {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Exit status of a launch that could not reach the executor.
pub const FATAL_EXIT_CODE: i32 = 1;
