//! Recording fakes for the launcher's injected capabilities.
//!
//! All fakes write to one shared [`Journal`] so tests can assert the
//! relative order of shell-outs, downloads and ownership changes.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::fetcher::download::{DownloadError, Downloader};
use crate::identity::{Identity, IdentityError};
use crate::runner::CommandRunner;

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct RecordingRunner {
    journal: Journal,
    failure: Option<(&'static str, i32)>,
}

impl RecordingRunner {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            failure: None,
        }
    }

    /// Commands containing `needle` exit with `code`.
    pub fn failing_on(mut self, needle: &'static str, code: i32) -> Self {
        self.failure = Some((needle, code));
        self
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &str, cwd: &Path) -> io::Result<i32> {
        // curl writes to an absolute path, cwd is noise there.
        if command.starts_with("curl ") {
            self.journal.record(format!("run: {command}"));
        } else {
            self.journal
                .record(format!("run: {command} (in {})", cwd.display()));
        }

        match self.failure {
            Some((needle, code)) if command.contains(needle) => Ok(code),
            _ => Ok(0),
        }
    }
}

pub struct FakeDownloader {
    journal: Journal,
    status: u16,
}

impl FakeDownloader {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            status: 200,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u16, DownloadError> {
        self.journal
            .record(format!("download: {url} -> {}", dest.display()));
        Ok(self.status)
    }
}

#[derive(Default)]
pub struct RecordingIdentity {
    journal: Journal,
    fail: bool,
}

impl RecordingIdentity {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn outcome(&self, user: &str) -> Result<(), IdentityError> {
        if self.fail {
            Err(IdentityError::UnknownUser(user.to_string()))
        } else {
            Ok(())
        }
    }
}

impl Identity for RecordingIdentity {
    fn transfer_ownership(&self, path: &Path, user: &str) -> Result<(), IdentityError> {
        self.journal
            .record(format!("chown: {} -> {user}", path.display()));
        self.outcome(user)
    }

    fn switch_user(&self, user: &str) -> Result<(), IdentityError> {
        self.journal.record(format!("su: {user}"));
        self.outcome(user)
    }
}
