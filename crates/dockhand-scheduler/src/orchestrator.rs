//! Job request orchestrator - runs one job's pipeline to completion.
//!
//! The pipeline is strictly sequential:
//! fetch sources, parse the build definition, start services, build, and
//! release when a release image is configured. Service containers started
//! along the way are killed once the pipeline returns, whatever the outcome.

use derive_more::Display;
use dockhand_config::{CONFIG_FILE, parse_job_config_bytes};
use dockhand_core::executor::{ContainerHandle, ContainerSpec, Executor, OutputSink};
use dockhand_core::source::SourceProvider;
use dockhand_core::store::{JobLogger, JobStore};
use dockhand_core::{ContainerConfig, Error, Job, JobConfig, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Image used for the workdir container and for reading the build definition.
pub const GIT_IMAGE: &str = "radial/busyboxplus:git";

/// Path of the project sources inside the workdir container.
pub const BUILD_DIR: &str = "/dockhand/build";

/// Path of the artifacts volume inside the workdir container.
pub const ARTIFACTS_DIR: &str = "/dockhand/artifacts";

const FETCH_SCRIPT: &str = r#"git clone "$CLONE_URL" "$BUILD_DIR" && cd "$BUILD_DIR" && git checkout "$REFSPEC""#;

/// Pipeline stage. The display form is the step marker written to the job log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("fetch sources")]
    FetchSources,
    #[display("parse job config")]
    ParseConfig,
    #[display("start services")]
    StartServices,
    #[display("build")]
    Build,
    #[display("release")]
    Release,
}

/// A job plus the collaborators needed to run it.
pub struct JobRequest {
    job: Job,
    executor: Arc<dyn Executor>,
    store: Arc<dyn JobStore>,
    source: Arc<dyn SourceProvider>,
}

impl JobRequest {
    pub fn new(
        job: Job,
        executor: Arc<dyn Executor>,
        store: Arc<dyn JobStore>,
        source: Arc<dyn SourceProvider>,
    ) -> Self {
        Self {
            job,
            executor,
            store,
            source,
        }
    }

    /// Run the pipeline and persist the outcome. Stage failures end up in the
    /// job log and the returned job, never in the caller.
    pub async fn run(mut self) -> Job {
        if self.job.id.is_none() {
            if let Err(e) = self.store.save(&mut self.job).await {
                error!(job = %self.label(), error = %e, "Failed to create job");
                self.job.finish(false);
                return self.job;
            }
        }

        let logger = match self.store.logger(&self.job) {
            Ok(logger) => logger,
            Err(e) => {
                error!(error = %e, "Failed to open job log");
                return self.complete(false).await;
            }
        };

        let label = self.label();
        info!(
            job = %label,
            sha = ?self.job.sha,
            executor = self.executor.name(),
            "Starting job"
        );

        let mut services = ServiceSet::default();
        let result = self.pipeline(logger.as_ref(), &mut services).await;
        services.teardown(self.executor.as_ref()).await;

        let success = match result {
            Ok(()) => true,
            Err(e) => {
                error!(job = %label, error = %e, "Job failed");
                if let Err(log_err) = logger.write(format!("ERROR: {}\n", e).as_bytes()).await {
                    warn!(job = %label, error = %log_err, "Failed to write error to job log");
                }
                false
            }
        };

        self.complete(success).await
    }

    fn label(&self) -> String {
        match self.job.locator() {
            Some(locator) => locator.to_string(),
            None => format!("{}/{}@{}", self.job.owner, self.job.repo, self.job.branch),
        }
    }

    async fn complete(mut self, success: bool) -> Job {
        self.job.finish(success);
        if let Err(e) = self.store.save(&mut self.job).await {
            error!(job = %self.label(), error = %e, "Failed to save completed job");
        } else {
            info!(job = %self.label(), success, "Job completed");
        }
        self.job
    }

    async fn pipeline(&mut self, log: &dyn JobLogger, services: &mut ServiceSet) -> Result<()> {
        self.enter(Stage::FetchSources, log).await?;
        let workdir = self.fetch_sources(log).await?;

        self.enter(Stage::ParseConfig, log).await?;
        let config = self.parse_config(&workdir, log).await?;

        self.enter(Stage::StartServices, log).await?;
        self.start_services(&config, services).await?;

        self.enter(Stage::Build, log).await?;
        self.run_stage(Stage::Build, &config.build, services, &workdir, log)
            .await?;

        if let Some(release) = config.release_stage() {
            self.enter(Stage::Release, log).await?;
            self.run_stage(Stage::Release, release, services, &workdir, log)
                .await?;
        }
        Ok(())
    }

    async fn enter(&self, stage: Stage, log: &dyn JobLogger) -> Result<()> {
        info!(job = %self.label(), stage = %stage, "Entering stage");
        log.write_step(&stage.to_string()).await
    }

    async fn fetch_sources(&mut self, log: &dyn JobLogger) -> Result<ContainerHandle> {
        let sha = match &self.job.sha {
            Some(sha) => sha.clone(),
            None => self.resolve_sha(log).await?,
        };
        let clone_url = self
            .source
            .clone_url(&self.job.owner, &self.job.repo)
            .await?;

        let mut spec = ContainerSpec::new(GIT_IMAGE);
        spec.cmd = vec!["sh".to_string(), "-c".to_string(), FETCH_SCRIPT.to_string()];
        spec.volumes = vec![BUILD_DIR.to_string(), ARTIFACTS_DIR.to_string()];
        spec.env = vec![
            format!("BUILD_DIR={}", BUILD_DIR),
            format!("CLONE_URL={}", clone_url),
            format!("REFSPEC={}", sha),
        ];

        let workdir = self.executor.run(spec).await?;
        let sink = LogSink::new(log);
        self.executor
            .attach(&workdir, &sink, &sink)
            .await
            .map_err(|e| Error::Execution(format!("failed to fetch sources: {}", e)))?;

        let code = self.executor.wait(&workdir).await?;
        if code != 0 {
            return Err(Error::Execution(format!(
                "fetching sources exited with status {}",
                code
            )));
        }
        Ok(workdir)
    }

    /// Resolve the branch head and record it on the job right away.
    async fn resolve_sha(&mut self, log: &dyn JobLogger) -> Result<String> {
        let resolved = self
            .source
            .resolve_commit(&self.job.owner, &self.job.repo, &self.job.branch)
            .await?;
        let sha = self.job.resolve_sha(resolved).to_string();

        if let Err(e) = self.store.save(&mut self.job).await {
            warn!(job = %self.label(), error = %e, "Failed to record resolved commit");
            let note = format!("WARNING: failed to record commit {}: {}\n", sha, e);
            if let Err(log_err) = log.write(note.as_bytes()).await {
                warn!(error = %log_err, "Failed to write warning to job log");
            }
        }
        Ok(sha)
    }

    async fn parse_config(
        &self,
        workdir: &ContainerHandle,
        log: &dyn JobLogger,
    ) -> Result<JobConfig> {
        let mut spec = ContainerSpec::new(GIT_IMAGE);
        spec.cmd = vec!["cat".to_string(), CONFIG_FILE.to_string()];
        spec.volumes_from = vec![workdir.name.clone()];
        spec.working_dir = Some(BUILD_DIR.to_string());

        let reader = self.executor.run(spec).await?;
        let stdout = LogSink::capturing(log);
        let stderr = LogSink::new(log);
        self.executor.attach(&reader, &stdout, &stderr).await?;

        let code = self.executor.wait(&reader).await?;
        if code != 0 {
            return Err(Error::Execution(format!(
                "unable to read {} (exit status {})",
                CONFIG_FILE, code
            )));
        }

        Ok(parse_job_config_bytes(&stdout.into_captured())?)
    }

    async fn start_services(&self, config: &JobConfig, services: &mut ServiceSet) -> Result<()> {
        for (alias, service) in &config.services {
            let mut spec = ContainerSpec::from_config(service);
            spec.working_dir = service.workdir.clone();
            if config.link_services {
                spec.links = services.links();
            }

            info!(job = %self.label(), service = %alias, image = %service.image, "Starting service");
            let handle = self.executor.run(spec).await?;
            services.register(alias.clone(), handle);
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        stage: Stage,
        config: &ContainerConfig,
        services: &ServiceSet,
        workdir: &ContainerHandle,
        log: &dyn JobLogger,
    ) -> Result<()> {
        let mut spec = ContainerSpec::from_config(config);
        spec.env.push(format!("BUILD_DIR={}", BUILD_DIR));
        spec.env.push(format!("ARTIFACTS_DIR={}", ARTIFACTS_DIR));
        spec.links = services.links();
        spec.volumes_from = vec![workdir.name.clone()];
        spec.working_dir = Some(stage_workdir(config.workdir.as_deref()));

        let handle = self.executor.run(spec).await?;
        let sink = LogSink::new(log);
        self.executor.attach(&handle, &sink, &sink).await?;

        let code = self.executor.wait(&handle).await?;
        if code != 0 {
            return Err(Error::Execution(format!(
                "{} exited with status {}",
                stage, code
            )));
        }
        Ok(())
    }
}

/// Working directory for a build or release container.
fn stage_workdir(workdir: Option<&str>) -> String {
    match workdir {
        None => BUILD_DIR.to_string(),
        Some(dir) if dir.starts_with('/') => dir.to_string(),
        Some(dir) => {
            let relative = dir.trim_start_matches("./").trim_end_matches('/');
            if relative.is_empty() || relative == "." {
                BUILD_DIR.to_string()
            } else {
                format!("{}/{}", BUILD_DIR, relative)
            }
        }
    }
}

/// Service containers started for one job, in start order.
#[derive(Default)]
struct ServiceSet {
    started: Vec<(String, ContainerHandle)>,
}

impl ServiceSet {
    fn register(&mut self, alias: String, handle: ContainerHandle) {
        self.started.push((alias, handle));
    }

    /// Links to every registered service, as `container_name:alias`.
    fn links(&self) -> Vec<String> {
        self.started
            .iter()
            .map(|(alias, handle)| format!("{}:{}", handle.name, alias))
            .collect()
    }

    /// Kill every registered service. Failures are logged and skipped.
    async fn teardown(self, executor: &dyn Executor) {
        let kills = self.started.iter().map(|(alias, handle)| async move {
            if let Err(e) = executor.kill(handle).await {
                warn!(service = %alias, container = %handle.name, error = %e, "Failed to kill service");
            }
        });
        join_all(kills).await;
    }
}

/// Output sink that appends to the job log, optionally keeping a copy.
struct LogSink<'a> {
    log: &'a dyn JobLogger,
    capture: Option<Mutex<Vec<u8>>>,
}

impl<'a> LogSink<'a> {
    fn new(log: &'a dyn JobLogger) -> Self {
        Self { log, capture: None }
    }

    fn capturing(log: &'a dyn JobLogger) -> Self {
        Self {
            log,
            capture: Some(Mutex::new(Vec::new())),
        }
    }

    fn into_captured(self) -> Vec<u8> {
        self.capture.map(Mutex::into_inner).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl<'a> OutputSink for LogSink<'a> {
    async fn write(&self, chunk: &[u8]) -> Result<()> {
        if let Some(capture) = &self.capture {
            capture.lock().extend_from_slice(chunk);
        }
        self.log.write(chunk).await
    }
}
