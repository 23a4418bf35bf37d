use crate::config::SweepConfig;
use crate::progress::{PROGRESS_STATUS, ProgressReporter};
use anyhow::{Context, Result};
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// Remote submission failures a caller can act on. None of these are
/// retried; a failed submission leaves no job behind.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("authentication to {site} failed, you might not have permissions to access it")]
    Auth { site: String },
    #[error("the site registry is unreachable, check service availability and try again later")]
    RegistryUnreachable,
    #[error("site {site} seems to be down for the moment")]
    UnknownSite { site: String },
    #[error("could not find a {storage} storage on {site}")]
    NoStorage { storage: String, site: String },
    #[error("encountered an error during environment setup")]
    EnvSetupFailed,
    #[error("job finished with errors")]
    JobFailed,
    #[error("timeout waiting for job to complete, already completed {completed}")]
    Timeout { completed: u64 },
}

/// Lifecycle of a remote batch job. Terminal states are `Successful`
/// and `Failed`; the ordinal ordering mirrors the batch system's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobStatus {
    Pending,
    Running,
    Successful,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        self >= JobStatus::Successful
    }
}

/// A batch job description: shell command, accounting project and an
/// optional interactive job type for short setup work.
pub struct JobSpec {
    pub executable: String,
    pub project: String,
    pub interactive: bool,
    pub inputs: Vec<PathBuf>,
}

/// A storage endpoint on the remote site.
pub trait RemoteStorage {
    fn resource_url(&self) -> String;
    /// Directory names come back suffixed by '/'.
    fn listdir(&self, path: &str) -> Result<Vec<String>>;
    fn mkdir(&self, path: &str) -> Result<()>;
}

/// A submitted job and its working directory.
pub trait RemoteJob {
    fn status(&self) -> JobStatus;
    fn submission_time(&self) -> String;
    fn mount_point(&self) -> String;
    /// Block until the job reaches a terminal state.
    fn poll(&self) -> Result<()>;
    fn working_dir_listing(&self) -> Result<Vec<String>>;
    fn read_file(&self, name: &str) -> Result<Vec<u8>>;
    fn download(&self, name: &str, to: &Path) -> Result<()>;
}

/// An authenticated connection to one site.
pub trait RemoteClient {
    type Storage: RemoteStorage;
    type Job: RemoteJob;
    /// Paged storage listing.
    fn get_storages(&self, num: usize, offset: usize) -> Result<Vec<Self::Storage>>;
    fn new_job(&self, spec: &JobSpec) -> Result<Self::Job>;
}

/// Site registry and authentication boundary.
pub trait RemoteRegistry {
    type Client: RemoteClient;
    fn connect(&self, site: &str) -> Result<Self::Client, RemoteError>;
}

/// Site-specific submission settings.
#[derive(Debug, Clone)]
pub struct HpcConfig {
    pub site: String,
    pub project: String,
    /// Storage whose resource URL identifies the home/project area.
    pub storage_name: String,
    pub env_dir: String,
    pub env_name: String,
    pub python_dir: String,
    pub module_to_load: String,
    pub n_threads: usize,
    /// Wall-clock timeout in seconds; a non-positive value disables it.
    pub timeout: i64,
    pub poll_interval: Duration,
}

impl HpcConfig {
    pub fn new(site: &str, project: &str) -> Self {
        Self {
            site: site.to_string(),
            project: project.to_string(),
            storage_name: "HOME".to_string(),
            env_dir: "sweep_env".to_string(),
            env_name: "venv".to_string(),
            python_dir: "python3.10".to_string(),
            module_to_load: "Python".to_string(),
            n_threads: 4,
            timeout: -1,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Remote sweep orchestrator: serialize the sweep, make sure the remote
/// environment exists, submit the workflow, poll it to completion and
/// stage the result back.
pub struct HpcLaunch<R: RemoteRegistry> {
    registry: R,
    config: HpcConfig,
    progress: ProgressReporter,
}

const INSTALLED_PACKAGE: &str = concat!("gridsweep-", env!("CARGO_PKG_VERSION"));

impl<R: RemoteRegistry> HpcLaunch<R> {
    pub fn new(registry: R, config: HpcConfig, progress: ProgressReporter) -> Self {
        Self {
            registry,
            config,
            progress,
        }
    }

    /// Run the full submission state machine for one sweep, staging the
    /// declared output file back on success.
    pub fn launch(&self, sweep: &SweepConfig) -> Result<PathBuf> {
        let input = self
            .serialize_sweep(sweep)
            .context("failed to stage in the sweep")?;
        let client = self.connect()?;
        let home = self.find_home_storage(&client)?;

        if self.environment_ready(&home) {
            log::info!("environment is already prepared, it won't be recreated");
        } else {
            self.prepare_environment(&client)?;
        }

        let job = self.submit_workflow(&client, &input)?;
        log::info!(
            "job is running at {}: {}, submitted {}",
            self.config.site,
            job.mount_point(),
            job.submission_time()
        );
        self.monitor(&job)?;

        let mut output = sweep.file_name.clone();
        if !output.contains(".h5") {
            output.push_str(".h5");
        }
        self.stage_out(&job, &output)?;
        log::info!("finished execution");
        Ok(PathBuf::from(output))
    }

    fn serialize_sweep(&self, sweep: &SweepConfig) -> Result<PathBuf> {
        static SERIAL: AtomicU64 = AtomicU64::new(0);
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let serial = SERIAL.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("sweep_{stamp}_{serial}.toml"));
        let mut sweep = sweep.clone();
        sweep.n_threads = self.config.n_threads;
        sweep.write_file(&path)?;
        Ok(path)
    }

    fn connect(&self) -> Result<R::Client, RemoteError> {
        log::info!("connecting to {}...", self.config.site);
        let client = self.registry.connect(&self.config.site).inspect_err(|error| {
            log::error!("{error}");
        })?;
        log::info!("authenticated to {} with success", self.config.site);
        Ok(client)
    }

    fn find_home_storage(
        &self,
        client: &R::Client,
    ) -> Result<<R::Client as RemoteClient>::Storage> {
        log::info!("accessing storages on {}...", self.config.site);
        let num = 10;
        let mut offset = 0;
        loop {
            let storages = client
                .get_storages(num, offset)
                .context("failed to list storages")?;
            if storages.is_empty() {
                log::error!(
                    "could not find a {} storage on {}, stopping execution",
                    self.config.storage_name,
                    self.config.site
                );
                return Err(RemoteError::NoStorage {
                    storage: self.config.storage_name.clone(),
                    site: self.config.site.clone(),
                }
                .into());
            }
            if let Some(storage) = storages
                .into_iter()
                .find(|s| s.resource_url().ends_with(&self.config.storage_name))
            {
                return Ok(storage);
            }
            offset += num;
        }
    }

    /// Check the remote home for the environment directory, the virtual
    /// environment and a version marker matching the local build.
    fn environment_ready(&self, home: &<R::Client as RemoteClient>::Storage) -> bool {
        let cfg = &self.config;
        let root = match home.listdir("") {
            Ok(entries) => entries,
            Err(_) => return false,
        };
        if !root.contains(&format!("{}/", cfg.env_dir)) {
            log::info!("environment directory not found in {}, will be created", cfg.storage_name);
            if let Err(error) = home.mkdir(&cfg.env_dir) {
                log::warn!("failed to create {} directory: {error:#}", cfg.env_dir);
            }
            return false;
        }
        match home.listdir(&cfg.env_dir) {
            Ok(entries) if entries.contains(&format!("{}/", cfg.env_name)) => {}
            _ => {
                log::info!("environment not found, will be created");
                return false;
            }
        }

        let packages_path =
            format!("{}/{}/lib/{}/site-packages", cfg.env_dir, cfg.env_name, cfg.python_dir);
        match home.listdir(&packages_path) {
            Ok(packages) => {
                let found = packages.iter().find_map(|file| {
                    file.strip_prefix("gridsweep-")
                        .map(|rest| rest.trim_end_matches('/').trim_end_matches(".dist-info"))
                });
                match found {
                    Some(remote_version) if remote_version == env!("CARGO_PKG_VERSION") => {
                        log::info!("found matching remote version {remote_version}");
                        true
                    }
                    Some(remote_version) => {
                        log::info!(
                            "remote version {remote_version} differs from the local build, \
                             will recreate the environment"
                        );
                        false
                    }
                    None => {
                        log::info!("no installed version marker found, will recreate the environment");
                        false
                    }
                }
            }
            Err(_) => false,
        }
    }

    fn prepare_environment(&self, client: &R::Client) -> Result<()> {
        let cfg = &self.config;
        log::info!("preparing environment in your {} folder...", cfg.storage_name);
        let create = format!(
            "cd ${}/{} && rm -rf {} && python -mvenv {}",
            cfg.storage_name, cfg.env_dir, cfg.env_name, cfg.env_name
        );
        let activate = format!(
            "source ${}/{}/{}/bin/activate",
            cfg.storage_name, cfg.env_dir, cfg.env_name
        );
        let spec = JobSpec {
            executable: format!(
                "module load {} && {create} && {activate} && pip install -U pip && pip install {INSTALLED_PACKAGE}",
                cfg.module_to_load
            ),
            project: cfg.project.clone(),
            interactive: true,
            inputs: Vec::new(),
        };
        let job = client.new_job(&spec).context("failed to submit env setup job")?;
        log::info!(
            "environment setup running at {}, submitted {}, waiting for it to finish...",
            job.mount_point(),
            job.submission_time()
        );
        job.poll().context("failed while waiting for env setup")?;
        if job.status() == JobStatus::Failed {
            log::error!("encountered an error during environment setup, stopping execution");
            return Err(RemoteError::EnvSetupFailed.into());
        }
        log::info!("successfully finished the environment setup");
        Ok(())
    }

    fn submit_workflow(&self, client: &R::Client, input: &Path) -> Result<<R::Client as RemoteClient>::Job> {
        let cfg = &self.config;
        let input_name = input
            .file_name()
            .and_then(|n| n.to_str())
            .context("sweep input file has no name")?;
        let activate = format!(
            "source ${}/{}/{}/bin/activate",
            cfg.storage_name, cfg.env_dir, cfg.env_name
        );
        let command = format!(
            "module load {} && {activate} && gridsweep {input_name}",
            cfg.module_to_load
        );
        log::info!("launching workflow for command: {command}");
        let spec = JobSpec {
            executable: command,
            project: cfg.project.clone(),
            interactive: false,
            inputs: vec![input.to_path_buf()],
        };
        client.new_job(&spec).context("failed to submit workflow job")
    }

    /// Poll the job, feeding the remote progress counter to the caller's
    /// progress channel, until it reaches a terminal state or times out.
    fn monitor(&self, job: &<R::Client as RemoteClient>::Job) -> Result<()> {
        log::info!("waiting for job to finish...");
        let start = Instant::now();
        while !job.status().is_terminal() {
            let completed = self.read_remote_count(job);
            self.progress.count(completed);
            std::thread::sleep(self.config.poll_interval);
            if self.config.timeout > 0
                && start.elapsed() > Duration::from_secs(self.config.timeout as u64)
            {
                // Signal the problem to any bound front-end as well.
                self.progress.error("Connection Timeout");
                return Err(RemoteError::Timeout { completed }.into());
            }
        }
        if job.status() == JobStatus::Failed {
            log::error!("job finished with errors");
            return Err(RemoteError::JobFailed.into());
        }
        log::info!("job finished with success, staging out the results...");
        Ok(())
    }

    fn read_remote_count(&self, job: &<R::Client as RemoteClient>::Job) -> u64 {
        match job.read_file(PROGRESS_STATUS) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).trim().parse().unwrap_or(0),
            Err(error) => {
                log::warn!("could not read file {PROGRESS_STATUS}: {error:#}");
                0
            }
        }
    }

    /// Download the declared output file; a missing file is reported but
    /// not fatal, the user can fetch it manually.
    fn stage_out(&self, job: &<R::Client as RemoteClient>::Job, output: &str) -> Result<()> {
        let listing = job
            .working_dir_listing()
            .context("failed to list the remote working dir")?;
        if !listing.iter().any(|name| name == output) {
            log::info!(
                "could not find file {output}, could not finalize the stage out; \
                 please download your results manually"
            );
            return Ok(());
        }
        job.download(output, Path::new(output))
            .with_context(|| format!("failed to download {output}"))?;
        log::info!("{output} file has been downloaded successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParamValue, SweepConfig, test_simulator};
    use crate::progress::ProgressEvent;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    };

    fn sweep() -> SweepConfig {
        SweepConfig {
            param1: "model.a".to_string(),
            param2: "model.b".to_string(),
            param1_values: vec![ParamValue::Scalar(1.0), ParamValue::Scalar(2.0)],
            param2_values: vec![ParamValue::Scalar(3.0)],
            metrics: vec!["GlobalVariance".to_string()],
            n_threads: 2,
            file_name: "remote_out".to_string(),
            simulator: test_simulator(),
        }
    }

    #[derive(Clone)]
    struct MockStorage {
        url: String,
        /// Version marker of the package installed remotely; `None`
        /// models an empty home directory.
        installed: Option<String>,
        mkdir_fails: bool,
    }

    impl RemoteStorage for MockStorage {
        fn resource_url(&self) -> String {
            self.url.clone()
        }

        fn listdir(&self, path: &str) -> Result<Vec<String>> {
            let Some(version) = &self.installed else {
                return Ok(Vec::new());
            };
            Ok(match path {
                "" => vec!["sweep_env/".to_string()],
                "sweep_env" => vec!["venv/".to_string()],
                _ if path.ends_with("site-packages") => {
                    vec![format!("gridsweep-{version}.dist-info")]
                }
                _ => Vec::new(),
            })
        }

        fn mkdir(&self, _path: &str) -> Result<()> {
            if self.mkdir_fails {
                anyhow::bail!("permission denied");
            }
            Ok(())
        }
    }

    /// Ticks through a scripted status sequence on each poll.
    struct MockJob {
        statuses: Vec<JobStatus>,
        polls: AtomicU64,
        progress: Vec<u64>,
        files: Vec<String>,
        downloads: Arc<Mutex<Vec<String>>>,
    }

    impl MockJob {
        fn advancing(statuses: Vec<JobStatus>, progress: Vec<u64>, files: Vec<String>) -> Self {
            Self {
                statuses,
                polls: AtomicU64::new(0),
                progress,
                files,
                downloads: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl RemoteJob for Arc<MockJob> {
        fn status(&self) -> JobStatus {
            let at = self.polls.load(Ordering::SeqCst) as usize;
            *self.statuses.get(at).unwrap_or_else(|| {
                self.statuses.last().expect("scripted statuses are not empty")
            })
        }

        fn submission_time(&self) -> String {
            "01.01.2026, 12_00_00".to_string()
        }

        fn mount_point(&self) -> String {
            "/remote/work".to_string()
        }

        fn poll(&self) -> Result<()> {
            self.polls.store(self.statuses.len() as u64, Ordering::SeqCst);
            Ok(())
        }

        fn working_dir_listing(&self) -> Result<Vec<String>> {
            Ok(self.files.clone())
        }

        fn read_file(&self, name: &str) -> Result<Vec<u8>> {
            anyhow::ensure!(name == PROGRESS_STATUS, "unexpected file {name}");
            let at = self.polls.fetch_add(1, Ordering::SeqCst) as usize;
            let count = self.progress.get(at).or(self.progress.last()).copied().unwrap_or(0);
            Ok(count.to_string().into_bytes())
        }

        fn download(&self, name: &str, _to: &Path) -> Result<()> {
            self.downloads.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    struct MockClient {
        storages: Vec<MockStorage>,
        jobs: Mutex<Vec<Arc<MockJob>>>,
        submitted: Arc<Mutex<Vec<JobSpec>>>,
    }

    impl RemoteClient for MockClient {
        type Storage = MockStorage;
        type Job = Arc<MockJob>;

        fn get_storages(&self, num: usize, offset: usize) -> Result<Vec<MockStorage>> {
            Ok(self.storages.iter().skip(offset).take(num).cloned().collect())
        }

        fn new_job(&self, spec: &JobSpec) -> Result<Arc<MockJob>> {
            self.submitted.lock().unwrap().push(JobSpec {
                executable: spec.executable.clone(),
                project: spec.project.clone(),
                interactive: spec.interactive,
                inputs: spec.inputs.clone(),
            });
            let mut jobs = self.jobs.lock().unwrap();
            anyhow::ensure!(!jobs.is_empty(), "no scripted job left");
            Ok(jobs.remove(0))
        }
    }

    enum MockRegistry {
        Ok(Mutex<Option<MockClient>>),
        Fail(fn(&str) -> RemoteError),
    }

    impl RemoteRegistry for MockRegistry {
        type Client = MockClient;

        fn connect(&self, site: &str) -> Result<MockClient, RemoteError> {
            match self {
                MockRegistry::Ok(client) => Ok(client
                    .lock()
                    .unwrap()
                    .take()
                    .expect("client already taken")),
                MockRegistry::Fail(make) => Err(make(site)),
            }
        }
    }

    fn config() -> HpcConfig {
        let mut cfg = HpcConfig::new("JUSUF", "icei-hbp-0000");
        cfg.poll_interval = Duration::from_millis(20);
        cfg
    }

    fn home_storage(installed: Option<&str>) -> MockStorage {
        MockStorage {
            url: "https://site/storages/HOME".to_string(),
            installed: installed.map(str::to_string),
            mkdir_fails: false,
        }
    }

    fn registry_with_home(
        jobs: Vec<Arc<MockJob>>,
        home: MockStorage,
    ) -> (MockRegistry, Arc<Mutex<Vec<JobSpec>>>) {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let scratch = MockStorage {
            url: "https://site/storages/SCRATCH".to_string(),
            installed: None,
            mkdir_fails: false,
        };
        let client = MockClient {
            storages: vec![scratch, home],
            jobs: Mutex::new(jobs),
            submitted: Arc::clone(&submitted),
        };
        (MockRegistry::Ok(Mutex::new(Some(client))), submitted)
    }

    fn registry_with(
        jobs: Vec<Arc<MockJob>>,
        env_ready: bool,
    ) -> (MockRegistry, Arc<Mutex<Vec<JobSpec>>>) {
        let installed = env_ready.then_some(env!("CARGO_PKG_VERSION"));
        registry_with_home(jobs, home_storage(installed))
    }

    #[test]
    fn successful_launch_polls_and_stages_out() {
        let job = Arc::new(MockJob::advancing(
            vec![JobStatus::Running, JobStatus::Running, JobStatus::Successful],
            vec![1, 2],
            vec!["remote_out.h5".to_string(), PROGRESS_STATUS.to_string()],
        ));
        let downloads = Arc::clone(&job.downloads);
        let (registry, submitted) = registry_with(vec![job], true);

        let counts = Arc::new(Mutex::new(Vec::new()));
        let progress = {
            let counts = Arc::clone(&counts);
            ProgressReporter::callback(move |event| {
                if let ProgressEvent::Count(count) = event {
                    counts.lock().unwrap().push(count);
                }
            })
        };

        let launcher = HpcLaunch::new(registry, config(), progress);
        let output = launcher.launch(&sweep()).unwrap();
        assert_eq!(output, PathBuf::from("remote_out.h5"));
        assert_eq!(downloads.lock().unwrap().as_slice(), ["remote_out.h5"]);
        assert_eq!(counts.lock().unwrap().as_slice(), [1, 2]);
        // Environment was ready: only the workflow job was submitted.
        let submitted = submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].executable.contains("gridsweep sweep_"));
        assert_eq!(submitted[0].inputs.len(), 1);
    }

    #[test]
    fn missing_environment_triggers_setup_job() {
        let env_job = Arc::new(MockJob::advancing(
            vec![JobStatus::Pending, JobStatus::Successful],
            vec![],
            vec![],
        ));
        let work_job = Arc::new(MockJob::advancing(
            vec![JobStatus::Successful],
            vec![],
            vec!["remote_out.h5".to_string()],
        ));
        let (registry, submitted) = registry_with(vec![env_job, work_job], false);
        let launcher = HpcLaunch::new(registry, config(), ProgressReporter::callback(|_| {}));
        launcher.launch(&sweep()).unwrap();

        let submitted = submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert!(submitted[0].interactive);
        assert!(submitted[0].executable.contains("python -mvenv"));
        assert!(!submitted[1].interactive);
    }

    #[test]
    fn stale_remote_version_triggers_setup_job() {
        // "1.0" is a string suffix of the local "0.1.0" but is a
        // different version; the environment must be recreated.
        let env_job = Arc::new(MockJob::advancing(vec![JobStatus::Successful], vec![], vec![]));
        let work_job = Arc::new(MockJob::advancing(
            vec![JobStatus::Successful],
            vec![],
            vec!["remote_out.h5".to_string()],
        ));
        let (registry, submitted) =
            registry_with_home(vec![env_job, work_job], home_storage(Some("1.0")));
        let launcher = HpcLaunch::new(registry, config(), ProgressReporter::callback(|_| {}));
        launcher.launch(&sweep()).unwrap();

        let submitted = submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert!(submitted[0].interactive);
        assert!(submitted[0].executable.contains("python -mvenv"));
    }

    #[test]
    fn failed_env_dir_creation_is_not_fatal() {
        let env_job = Arc::new(MockJob::advancing(vec![JobStatus::Successful], vec![], vec![]));
        let work_job = Arc::new(MockJob::advancing(
            vec![JobStatus::Successful],
            vec![],
            vec!["remote_out.h5".to_string()],
        ));
        let mut home = home_storage(None);
        home.mkdir_fails = true;
        let (registry, submitted) = registry_with_home(vec![env_job, work_job], home);
        let launcher = HpcLaunch::new(registry, config(), ProgressReporter::callback(|_| {}));
        launcher.launch(&sweep()).unwrap();
        // The setup job still runs and recreates the directory itself.
        assert_eq!(submitted.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_env_setup_aborts() {
        let env_job = Arc::new(MockJob::advancing(vec![JobStatus::Failed], vec![], vec![]));
        let (registry, _) = registry_with(vec![env_job], false);
        let launcher = HpcLaunch::new(registry, config(), ProgressReporter::callback(|_| {}));
        let error = launcher.launch(&sweep()).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RemoteError>(),
            Some(RemoteError::EnvSetupFailed)
        ));
    }

    #[test]
    fn connection_failures_abort_with_specific_cause() {
        for (make, expect) in [
            (
                (|site: &str| RemoteError::Auth { site: site.to_string() }) as fn(&str) -> RemoteError,
                "authentication",
            ),
            (|_| RemoteError::RegistryUnreachable, "registry"),
            (
                |site: &str| RemoteError::UnknownSite { site: site.to_string() },
                "down for the moment",
            ),
        ] {
            let launcher = HpcLaunch::new(
                MockRegistry::Fail(make),
                config(),
                ProgressReporter::callback(|_| {}),
            );
            let error = launcher.launch(&sweep()).unwrap_err();
            assert!(format!("{error:#}").contains(expect));
        }
    }

    #[test]
    fn timeout_carries_last_observed_count() {
        let job = Arc::new(MockJob::advancing(
            vec![JobStatus::Running],
            vec![3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
                 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
                 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4],
            vec![],
        ));
        let (registry, _) = registry_with(vec![job], true);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let progress = {
            let errors = Arc::clone(&errors);
            ProgressReporter::callback(move |event| {
                if let ProgressEvent::Error(msg) = event {
                    errors.lock().unwrap().push(msg);
                }
            })
        };

        let mut cfg = config();
        cfg.timeout = 1;
        let launcher = HpcLaunch::new(registry, cfg, progress);
        let started = Instant::now();
        let error = launcher.launch(&sweep()).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        match error.downcast_ref::<RemoteError>() {
            Some(RemoteError::Timeout { completed }) => assert_eq!(*completed, 4),
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert_eq!(errors.lock().unwrap().as_slice(), ["Connection Timeout"]);
    }

    #[test]
    fn missing_output_file_is_not_fatal() {
        let job = Arc::new(MockJob::advancing(
            vec![JobStatus::Successful],
            vec![],
            vec!["unrelated.log".to_string()],
        ));
        let downloads = Arc::clone(&job.downloads);
        let (registry, _) = registry_with(vec![job], true);
        let launcher = HpcLaunch::new(registry, config(), ProgressReporter::callback(|_| {}));
        launcher.launch(&sweep()).unwrap();
        assert!(downloads.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_job_skips_stage_out() {
        let job = Arc::new(MockJob::advancing(
            vec![JobStatus::Running, JobStatus::Failed],
            vec![5],
            vec!["remote_out.h5".to_string()],
        ));
        let downloads = Arc::clone(&job.downloads);
        let (registry, _) = registry_with(vec![job], true);
        let launcher = HpcLaunch::new(registry, config(), ProgressReporter::callback(|_| {}));
        let error = launcher.launch(&sweep()).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RemoteError>(),
            Some(RemoteError::JobFailed)
        ));
        assert!(downloads.lock().unwrap().is_empty());
    }
}
