//! Resource fetching into the executor's working directory.
//!
//! Each declared URI is validated, retrieved according to its scheme,
//! optionally chowned and made executable, then extracted if it is an
//! archive. The first failure aborts the whole fetch; nothing is rolled
//! back and nothing is retried.

pub mod download;

use std::ffi::OsString;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::identity::{Identity, IdentityError};
use crate::launcher::spec::{LaunchSpec, ResourceUri};
use crate::runner::CommandRunner;
use download::Downloader;

/// rwxr-xr-x
const EXECUTABLE_MODE: u32 = 0o755;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("illegal characters in resource '{0}'")]
    InvalidResource(String),

    #[error("malformed URL (missing path): {0}")]
    MalformedUrl(String),

    #[error(
        "a relative path was passed for resource '{0}' but frameworks_home is not set; \
         set it or use an absolute path"
    )]
    MissingResourceRoot(String),

    #[error("failed to fetch {resource}: {reason}")]
    TransferFailed { resource: String, reason: String },

    #[error("failed to chown fetched resource: {0}")]
    OwnershipFailed(#[source] IdentityError),

    #[error("failed to chmod {}: {source}", path.display())]
    PermissionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract {}: {tool} exit code {code}", path.display())]
    ExtractionFailed {
        path: PathBuf,
        tool: &'static str,
        code: i32,
    },
}

impl FetchError {
    fn transfer(resource: &str, reason: impl ToString) -> Self {
        Self::TransferFailed {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Where a resource comes from, decided by its prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceKind {
    /// `hdfs://` or `hftp://`
    Hadoop,
    /// `http://`, `https://`, `ftp://`, `ftps://`
    Download,
    Local,
}

impl ResourceKind {
    pub fn classify(resource: &str) -> Self {
        const HADOOP: [&str; 2] = ["hdfs://", "hftp://"];
        const DOWNLOAD: [&str; 4] = ["http://", "https://", "ftp://", "ftps://"];

        if HADOOP.iter().any(|p| resource.starts_with(p)) {
            ResourceKind::Hadoop
        } else if DOWNLOAD.iter().any(|p| resource.starts_with(p)) {
            ResourceKind::Download
        } else {
            ResourceKind::Local
        }
    }
}

/// Archive formats extracted in place after fetching.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Archive {
    TarGz,
    Zip,
}

impl Archive {
    fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();
        if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Some(Archive::TarGz)
        } else if name.ends_with(".zip") {
            Some(Archive::Zip)
        } else {
            None
        }
    }

    fn tool(self) -> &'static str {
        match self {
            Archive::TarGz => "tar",
            Archive::Zip => "unzip",
        }
    }

    /// `name` is relative to the directory the command runs in.
    fn command(self, name: &Path) -> String {
        match self {
            Archive::TarGz => format!("tar xzf '{}'", name.display()),
            Archive::Zip => format!("unzip '{}'", name.display()),
        }
    }
}

/// Materializes a launch's resources into its working directory.
pub struct ResourceFetcher {
    runner: Arc<dyn CommandRunner>,
    downloader: Arc<dyn Downloader>,
    identity: Arc<dyn Identity>,
}

impl ResourceFetcher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        downloader: Arc<dyn Downloader>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            runner,
            downloader,
            identity,
        }
    }

    /// Fetches every resource of `spec`, in declared order.
    ///
    /// Returns the local path of each fetched resource.
    pub async fn fetch_all(&self, spec: &LaunchSpec) -> Result<Vec<PathBuf>, FetchError> {
        info!("Fetching resources into {}", spec.work_directory.display());

        let mut fetched = Vec::with_capacity(spec.command.uris.len());
        for uri in &spec.command.uris {
            match self.fetch_one(spec, uri).await {
                Ok(path) => fetched.push(path),
                Err(e) => {
                    error!("Failed to fetch {}: {e}", uri.value);
                    return Err(e);
                }
            }
        }
        Ok(fetched)
    }

    async fn fetch_one(&self, spec: &LaunchSpec, uri: &ResourceUri) -> Result<PathBuf, FetchError> {
        let resource = uri.value.as_str();
        info!("Fetching resource {resource}");

        // The value ends up inside single-quoted shell arguments.
        if resource.contains(['\\', '\'', '\0']) {
            return Err(FetchError::InvalidResource(resource.to_string()));
        }

        let work_dir = spec.work_dir();
        let local = match ResourceKind::classify(resource) {
            ResourceKind::Hadoop => self.fetch_hadoop(spec, resource).await?,
            ResourceKind::Download => self.fetch_download(work_dir, resource).await?,
            ResourceKind::Local => self.fetch_local(spec, resource).await?,
        };

        if spec.switch_user {
            self.identity
                .transfer_ownership(&local, &spec.user)
                .map_err(FetchError::OwnershipFailed)?;
        }

        if uri.executable {
            std::fs::set_permissions(&local, Permissions::from_mode(EXECUTABLE_MODE)).map_err(
                |source| FetchError::PermissionFailed {
                    path: local.clone(),
                    source,
                },
            )?;
        }

        if let Some(archive) = Archive::detect(&local) {
            self.extract(archive, &local, work_dir).await?;
        }

        Ok(local)
    }

    async fn fetch_hadoop(&self, spec: &LaunchSpec, resource: &str) -> Result<PathBuf, FetchError> {
        let hadoop = hadoop_script(spec.hadoop_home.as_deref(), std::env::var_os("HADOOP_HOME"));
        let name = base_name(resource)?;
        let local = spec.work_dir().join(&name);

        // The work directory may contain quotes; the runner already runs in it.
        let command = format!("{hadoop} fs -copyToLocal '{resource}' './{name}'");
        info!("Downloading resource from {resource}");
        debug!("HDFS command: {command}");

        match self.runner.run(&command, spec.work_dir()).await {
            Ok(0) => Ok(local),
            Ok(code) => Err(FetchError::transfer(
                resource,
                format!("hadoop copyToLocal exit code {code}"),
            )),
            Err(e) => Err(FetchError::transfer(resource, e)),
        }
    }

    async fn fetch_download(&self, work_dir: &Path, resource: &str) -> Result<PathBuf, FetchError> {
        let local = work_dir.join(download_file_name(resource)?);
        info!("Downloading {resource} to {}", local.display());

        match self.downloader.download(resource, &local).await {
            Ok(200) => Ok(local),
            Ok(code) => Err(FetchError::transfer(
                resource,
                format!("received HTTP/FTP return code {code}"),
            )),
            Err(e) => Err(FetchError::transfer(resource, e)),
        }
    }

    async fn fetch_local(&self, spec: &LaunchSpec, resource: &str) -> Result<PathBuf, FetchError> {
        let source = if resource.starts_with('/') {
            PathBuf::from(resource)
        } else {
            let root = spec
                .frameworks_home
                .as_deref()
                .ok_or_else(|| FetchError::MissingResourceRoot(resource.to_string()))?;
            let joined = root.join(resource);
            info!(
                "Prepended frameworks_home to resource path, making it: {}",
                joined.display()
            );
            joined
        };

        let source_str = source.to_string_lossy();
        let local = spec.work_dir().join(base_name(&source_str)?);

        let command = format!("cp {source_str} .");
        info!("Copying resource from {source_str} to {}", spec.work_dir().display());

        match self.runner.run(&command, spec.work_dir()).await {
            Ok(0) => Ok(local),
            Ok(code) => Err(FetchError::transfer(resource, format!("cp exit code {code}"))),
            Err(e) => Err(FetchError::transfer(resource, e)),
        }
    }

    async fn extract(&self, archive: Archive, path: &Path, work_dir: &Path) -> Result<(), FetchError> {
        let name = path.file_name().map(Path::new).unwrap_or(path);
        let command = archive.command(&Path::new(".").join(name));
        info!("Extracting resource: {command}");

        let code = match self.runner.run(&command, work_dir).await {
            Ok(code) => code,
            Err(e) => {
                error!("Failed to spawn {}: {e}", archive.tool());
                -1
            }
        };

        if code == 0 {
            Ok(())
        } else {
            Err(FetchError::ExtractionFailed {
                path: path.to_path_buf(),
                tool: archive.tool(),
                code,
            })
        }
    }
}

/// Hadoop launcher script: configured home, then `$HADOOP_HOME`, then PATH.
pub fn hadoop_script(configured: Option<&Path>, env_home: Option<OsString>) -> String {
    let home = configured
        .map(Path::to_path_buf)
        .or_else(|| env_home.filter(|h| !h.is_empty()).map(PathBuf::from));

    match home {
        Some(home) => home.join("bin/hadoop").to_string_lossy().into_owned(),
        None => "hadoop".to_string(),
    }
}

/// Trailing file name for a direct-download URL.
///
/// The part after the scheme needs a `/` followed by at least one
/// character, and the last `/` must not end the URL.
pub fn download_file_name(resource: &str) -> Result<String, FetchError> {
    let malformed = || FetchError::MalformedUrl(resource.to_string());

    let path = resource
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(malformed)?;
    let first_slash = path.find('/').ok_or_else(malformed)?;
    if path.len() <= first_slash + 1 {
        return Err(malformed());
    }

    match path.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(malformed()),
    }
}

fn base_name(resource: &str) -> Result<String, FetchError> {
    Path::new(resource)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| FetchError::transfer(resource, "cannot determine file name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::spec::CommandInfo;
    use crate::runner::ShellRunner;
    use crate::testing::{FakeDownloader, Journal, RecordingIdentity, RecordingRunner};

    fn spec(work_dir: &Path, uris: Vec<ResourceUri>) -> LaunchSpec {
        LaunchSpec {
            framework_id: "fw".to_string(),
            executor_id: "ex".to_string(),
            command: CommandInfo {
                value: "./run".to_string(),
                uris,
                environment: Vec::new(),
            },
            user: "nobody".to_string(),
            work_directory: work_dir.to_path_buf(),
            slave_pid: "slave(1)@127.0.0.1:5051".to_string(),
            hadoop_home: Some(PathBuf::from("/opt/hadoop")),
            frameworks_home: None,
            redirect_io: false,
            switch_user: false,
            container: None,
        }
    }

    fn fetcher(journal: &Journal) -> ResourceFetcher {
        ResourceFetcher::new(
            Arc::new(RecordingRunner::new(journal.clone())),
            Arc::new(FakeDownloader::new(journal.clone())),
            Arc::new(RecordingIdentity::new(journal.clone())),
        )
    }

    #[test]
    fn test_classify() {
        assert_eq!(ResourceKind::classify("hdfs://nn/a"), ResourceKind::Hadoop);
        assert_eq!(ResourceKind::classify("hftp://nn/a"), ResourceKind::Hadoop);
        assert_eq!(ResourceKind::classify("http://h/a"), ResourceKind::Download);
        assert_eq!(ResourceKind::classify("https://h/a"), ResourceKind::Download);
        assert_eq!(ResourceKind::classify("ftp://h/a"), ResourceKind::Download);
        assert_eq!(ResourceKind::classify("ftps://h/a"), ResourceKind::Download);
        assert_eq!(ResourceKind::classify("/abs/a"), ResourceKind::Local);
        assert_eq!(ResourceKind::classify("rel/a"), ResourceKind::Local);
        assert_eq!(ResourceKind::classify("s3://b/a"), ResourceKind::Local);
    }

    #[test]
    fn test_hadoop_script_precedence() {
        assert_eq!(
            hadoop_script(Some(Path::new("/opt/h")), Some("/env/h".into())),
            "/opt/h/bin/hadoop"
        );
        assert_eq!(hadoop_script(None, Some("/env/h".into())), "/env/h/bin/hadoop");
        assert_eq!(hadoop_script(None, Some("".into())), "hadoop");
        assert_eq!(hadoop_script(None, None), "hadoop");
    }

    #[test]
    fn test_download_file_name() {
        assert_eq!(download_file_name("http://host/path/file.tgz").unwrap(), "file.tgz");
        assert_eq!(download_file_name("ftp://host/f").unwrap(), "f");
        assert!(matches!(
            download_file_name("http://host"),
            Err(FetchError::MalformedUrl(_))
        ));
        assert!(matches!(
            download_file_name("http://host/"),
            Err(FetchError::MalformedUrl(_))
        ));
        assert!(matches!(
            download_file_name("https://host/dir/"),
            Err(FetchError::MalformedUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_illegal_characters_rejected_before_any_access() {
        for bad in ["http://h/a\\b", "http://h/it's", "/tmp/nul\0byte"] {
            let journal = Journal::default();
            let spec = spec(
                Path::new("/sandbox"),
                vec![ResourceUri::new(bad, true)],
            );

            let err = fetcher(&journal).fetch_all(&spec).await.unwrap_err();
            assert!(matches!(err, FetchError::InvalidResource(_)), "{bad:?}");
            assert!(journal.entries().is_empty());
        }
    }

    #[tokio::test]
    async fn test_malformed_url_does_not_download() {
        let journal = Journal::default();
        let spec = spec(Path::new("/sandbox"), vec![ResourceUri::new("http://host", false)]);

        let err = fetcher(&journal).fetch_all(&spec).await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedUrl(_)));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_relative_path_without_root() {
        let journal = Journal::default();
        let spec = spec(Path::new("/sandbox"), vec![ResourceUri::new("relative/file", false)]);

        let err = fetcher(&journal).fetch_all(&spec).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingResourceRoot(_)));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_relative_path_joined_onto_root() {
        let journal = Journal::default();
        let mut spec = spec(Path::new("/sandbox"), vec![ResourceUri::new("fw/bin/exec", false)]);
        spec.frameworks_home = Some(PathBuf::from("/var/lib/frameworks"));

        let fetched = fetcher(&journal).fetch_all(&spec).await.unwrap();
        assert_eq!(fetched, vec![PathBuf::from("/sandbox/exec")]);
        assert_eq!(
            journal.entries(),
            vec!["run: cp /var/lib/frameworks/fw/bin/exec . (in /sandbox)"]
        );
    }

    #[tokio::test]
    async fn test_hadoop_command() {
        let journal = Journal::default();
        let spec = spec(
            Path::new("/sandbox"),
            vec![ResourceUri::new("hdfs://nn:9000/apps/job.jar", false)],
        );

        let fetched = fetcher(&journal).fetch_all(&spec).await.unwrap();
        assert_eq!(fetched, vec![PathBuf::from("/sandbox/job.jar")]);
        assert_eq!(
            journal.entries(),
            vec![
                "run: /opt/hadoop/bin/hadoop fs -copyToLocal 'hdfs://nn:9000/apps/job.jar' \
                 './job.jar' (in /sandbox)"
            ]
        );
    }

    #[tokio::test]
    async fn test_hadoop_failure_is_transfer_failed() {
        let journal = Journal::default();
        let fetcher = ResourceFetcher::new(
            Arc::new(RecordingRunner::new(journal.clone()).failing_on("copyToLocal", 255)),
            Arc::new(FakeDownloader::new(journal.clone())),
            Arc::new(RecordingIdentity::new(journal.clone())),
        );
        let spec = spec(Path::new("/sandbox"), vec![ResourceUri::new("hftp://nn/a", false)]);

        let err = fetcher.fetch_all(&spec).await.unwrap_err();
        assert!(matches!(err, FetchError::TransferFailed { .. }));
    }

    #[tokio::test]
    async fn test_download_and_extract_tgz() {
        let journal = Journal::default();
        let spec = spec(
            Path::new("/sandbox"),
            vec![ResourceUri::new("http://host/path/file.tgz", false)],
        );

        let fetched = fetcher(&journal).fetch_all(&spec).await.unwrap();
        assert_eq!(fetched, vec![PathBuf::from("/sandbox/file.tgz")]);
        assert_eq!(
            journal.entries(),
            vec![
                "download: http://host/path/file.tgz -> /sandbox/file.tgz",
                "run: tar xzf './file.tgz' (in /sandbox)",
            ]
        );
    }

    #[tokio::test]
    async fn test_zip_uses_unzip() {
        let journal = Journal::default();
        let spec = spec(
            Path::new("/sandbox"),
            vec![ResourceUri::new("https://host/bundle.zip", false)],
        );

        fetcher(&journal).fetch_all(&spec).await.unwrap();
        assert_eq!(
            journal.entries().last().unwrap(),
            "run: unzip './bundle.zip' (in /sandbox)"
        );
    }

    #[tokio::test]
    async fn test_non_200_is_transfer_failed() {
        let journal = Journal::default();
        let fetcher = ResourceFetcher::new(
            Arc::new(RecordingRunner::new(journal.clone())),
            Arc::new(FakeDownloader::new(journal.clone()).with_status(404)),
            Arc::new(RecordingIdentity::new(journal.clone())),
        );
        let spec = spec(Path::new("/sandbox"), vec![ResourceUri::new("http://h/p/a.tgz", false)]);

        let err = fetcher.fetch_all(&spec).await.unwrap_err();
        assert!(err.to_string().contains("404"));
        // Nothing extracted.
        assert_eq!(journal.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_chown_happens_before_extraction_and_on_archive_only() {
        let journal = Journal::default();
        let mut spec = spec(
            Path::new("/sandbox"),
            vec![ResourceUri::new("/srv/a.tar.gz", false)],
        );
        spec.switch_user = true;

        fetcher(&journal).fetch_all(&spec).await.unwrap();
        assert_eq!(
            journal.entries(),
            vec![
                "run: cp /srv/a.tar.gz . (in /sandbox)",
                "chown: /sandbox/a.tar.gz -> nobody",
                "run: tar xzf './a.tar.gz' (in /sandbox)",
            ]
        );
    }

    #[tokio::test]
    async fn test_ownership_failure() {
        let journal = Journal::default();
        let fetcher = ResourceFetcher::new(
            Arc::new(RecordingRunner::new(journal.clone())),
            Arc::new(FakeDownloader::new(journal.clone())),
            Arc::new(RecordingIdentity::new(journal.clone()).failing()),
        );
        let mut spec = spec(Path::new("/sandbox"), vec![ResourceUri::new("/srv/a", false)]);
        spec.switch_user = true;

        let err = fetcher.fetch_all(&spec).await.unwrap_err();
        assert!(matches!(err, FetchError::OwnershipFailed(_)));
    }

    #[tokio::test]
    async fn test_extraction_failure() {
        let journal = Journal::default();
        let fetcher = ResourceFetcher::new(
            Arc::new(RecordingRunner::new(journal.clone()).failing_on("tar", 2)),
            Arc::new(FakeDownloader::new(journal.clone())),
            Arc::new(RecordingIdentity::new(journal.clone())),
        );
        let spec = spec(Path::new("/sandbox"), vec![ResourceUri::new("/srv/a.tgz", false)]);

        let err = fetcher.fetch_all(&spec).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::ExtractionFailed { tool: "tar", code: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_first_failure_stops_the_fetch() {
        let journal = Journal::default();
        let spec = spec(
            Path::new("/sandbox"),
            vec![
                ResourceUri::new("/srv/first", false),
                ResourceUri::new("http://bad", false),
                ResourceUri::new("/srv/third", false),
            ],
        );

        let err = fetcher(&journal).fetch_all(&spec).await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedUrl(_)));
        assert_eq!(journal.entries(), vec!["run: cp /srv/first . (in /sandbox)"]);
    }

    #[tokio::test]
    async fn test_local_copy_and_chmod_with_real_shell() {
        let src_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("tool.sh");
        std::fs::write(&source, b"#!/bin/sh\necho hi\n").unwrap();
        std::fs::set_permissions(&source, Permissions::from_mode(0o600)).unwrap();

        let journal = Journal::default();
        let fetcher = ResourceFetcher::new(
            Arc::new(ShellRunner),
            Arc::new(FakeDownloader::new(journal.clone())),
            Arc::new(RecordingIdentity::new(journal.clone())),
        );
        let spec = spec(
            work_dir.path(),
            vec![ResourceUri::new(source.to_str().unwrap(), true)],
        );

        let fetched = fetcher.fetch_all(&spec).await.unwrap();
        let local = work_dir.path().join("tool.sh");
        assert_eq!(fetched, vec![local.clone()]);

        let mode = std::fs::metadata(&local).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_extract_into_work_dir_with_quote() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("payload.txt"), b"data\n").unwrap();
        let status = std::process::Command::new("tar")
            .args(["czf", "bundle.tgz", "payload.txt"])
            .current_dir(src_dir.path())
            .status()
            .unwrap();
        assert!(status.success());

        let root = tempfile::tempdir().unwrap();
        let work_dir = root.path().join("o'brien");
        std::fs::create_dir(&work_dir).unwrap();

        let journal = Journal::default();
        let fetcher = ResourceFetcher::new(
            Arc::new(ShellRunner),
            Arc::new(FakeDownloader::new(journal.clone())),
            Arc::new(RecordingIdentity::new(journal.clone())),
        );
        let bundle = src_dir.path().join("bundle.tgz");
        let spec = spec(&work_dir, vec![ResourceUri::new(bundle.to_str().unwrap(), false)]);

        let fetched = fetcher.fetch_all(&spec).await.unwrap();
        assert_eq!(fetched, vec![work_dir.join("bundle.tgz")]);
        assert_eq!(
            std::fs::read_to_string(work_dir.join("payload.txt")).unwrap(),
            "data\n"
        );
    }

    #[tokio::test]
    async fn test_chmod_missing_file_is_permission_failed() {
        // The recording runner pretends cp succeeded without creating anything.
        let journal = Journal::default();
        let work_dir = tempfile::tempdir().unwrap();
        let spec = spec(work_dir.path(), vec![ResourceUri::new("/srv/ghost", true)]);

        let err = fetcher(&journal).fetch_all(&spec).await.unwrap_err();
        assert!(matches!(err, FetchError::PermissionFailed { .. }));
    }
}
