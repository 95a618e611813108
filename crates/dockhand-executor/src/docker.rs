//! Docker executor implementation.

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::HostConfig;
use bollard::{API_DEFAULT_VERSION, Docker};
use bytes::Bytes;
use dockhand_core::executor::{ContainerHandle, ContainerSpec, Executor, OutputSink};
use dockhand_core::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Seconds before a request to the daemon times out.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// How to reach the Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Platform defaults (`DOCKER_HOST` or the local socket).
    Local,
    /// Unix socket at the given path.
    Socket(String),
    /// Plain HTTP.
    Http(String),
    /// HTTPS with client certificates from a directory holding `cert.pem`,
    /// `key.pem` and `ca.pem`.
    Tls { addr: String, cert_dir: PathBuf },
}

impl Endpoint {
    pub fn parse(endpoint: &str, cert_dir: Option<&Path>) -> Self {
        if endpoint.is_empty() {
            return Endpoint::Local;
        }
        if let Some(path) = endpoint.strip_prefix("unix://") {
            return Endpoint::Socket(path.to_string());
        }
        if endpoint.starts_with('/') {
            return Endpoint::Socket(endpoint.to_string());
        }
        match cert_dir {
            Some(dir) => Endpoint::Tls {
                addr: endpoint.to_string(),
                cert_dir: dir.to_path_buf(),
            },
            None => Endpoint::Http(endpoint.to_string()),
        }
    }
}

/// Docker executor over the Docker Engine API.
pub struct DockerExecutor {
    docker: Docker,
}

impl DockerExecutor {
    /// Connect to the daemon at `endpoint`, using TLS when `cert_dir` is given
    /// for a network endpoint.
    pub fn connect(endpoint: &str, cert_dir: Option<&Path>) -> Result<Self> {
        let endpoint = Endpoint::parse(endpoint, cert_dir);
        let docker = match &endpoint {
            Endpoint::Local => Docker::connect_with_local_defaults(),
            Endpoint::Socket(path) => {
                Docker::connect_with_socket(path, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Endpoint::Http(addr) => {
                Docker::connect_with_http(addr, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Endpoint::Tls { addr, cert_dir } => Docker::connect_with_ssl(
                addr,
                &cert_dir.join("key.pem"),
                &cert_dir.join("cert.pem"),
                &cert_dir.join("ca.pem"),
                DOCKER_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
        }
        .map_err(|e| Error::Transport(format!("Failed to connect to Docker: {}", e)))?;

        info!(endpoint = ?endpoint, "Connected to Docker");
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn unique_name() -> String {
        format!("dockhand-{}", Uuid::now_v7())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let (repository, tag) = split_image_reference(image);
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            let info = result.map_err(|e| transport("pull", image, e))?;
            if let Some(status) = info.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }
}

fn transport(action: &str, target: &str, err: BollardError) -> Error {
    Error::Transport(format!("Failed to {} {}: {}", action, target, err))
}

/// Split an image reference into the repository and tag to pull.
///
/// A missing tag means `latest`. Digest references are pulled as-is with no
/// tag. A colon before the last `/` belongs to a registry port.
pub fn split_image_reference(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }

    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

/// Translate a run spec into the daemon's container configuration.
pub fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .ports
        .iter()
        .map(|p| (p.clone(), HashMap::new()))
        .collect();
    let volumes: HashMap<String, HashMap<(), ()>> = spec
        .volumes
        .iter()
        .map(|v| (v.clone(), HashMap::new()))
        .collect();

    let host_config = HostConfig {
        links: (!spec.links.is_empty()).then(|| spec.links.clone()),
        volumes_from: (!spec.volumes_from.is_empty()).then(|| spec.volumes_from.clone()),
        privileged: Some(spec.privileged),
        publish_all_ports: Some(!spec.ports.is_empty()),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        env: Some(spec.env.clone()),
        working_dir: spec.working_dir.clone(),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        volumes: (!volumes.is_empty()).then_some(volumes),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        if !spec.local_image {
            self.pull(&spec.image).await?;
        }

        let name = Self::unique_name();
        let config = container_config(&spec);
        let create_options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        info!(container = %name, image = %spec.image, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| transport("create container", &name, e))?;

        info!(container = %name, "Starting container");
        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| transport("start container", &name, e))?;

        Ok(ContainerHandle {
            id: container.id,
            name,
        })
    }

    async fn attach(
        &self,
        handle: &ContainerHandle,
        stdout: &dyn OutputSink,
        stderr: &dyn OutputSink,
    ) -> Result<()> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };

        let AttachContainerResults { mut output, .. } = self
            .docker
            .attach_container(&handle.id, Some(options))
            .await
            .map_err(|e| transport("attach to container", &handle.name, e))?;

        while let Some(frame) = output.next().await {
            match frame.map_err(|e| transport("read output of", &handle.name, e))? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    stdout.write(&message).await?
                }
                LogOutput::StdErr { message } => stderr.write(&message).await?,
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(())
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(&handle.id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as an error frame carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(transport("wait for container", &handle.name, e)),
            None => Err(Error::Transport(format!(
                "Wait stream for container {} ended without an exit code",
                handle.name
            ))),
        }
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<()> {
        info!(container = %handle.name, "Killing container");
        self.docker
            .kill_container(&handle.id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| transport("kill container", &handle.name, e))
    }

    async fn build(&self, context: Bytes, output: &dyn OutputSink) -> Result<String> {
        let tag = Self::unique_name();
        let options = BuildImageOptions {
            t: tag.clone(),
            rm: true,
            ..Default::default()
        };

        info!(image = %tag, "Building image");
        let mut stream = self.docker.build_image(options, None, Some(context));
        while let Some(result) = stream.next().await {
            let info = match result {
                Ok(info) => info,
                Err(BollardError::DockerStreamError { error }) => {
                    return Err(Error::Execution(format!("Image build failed: {}", error)));
                }
                Err(e) => return Err(transport("build image", &tag, e)),
            };

            if let Some(error) = info.error {
                return Err(Error::Execution(format!("Image build failed: {}", error)));
            }
            if let Some(line) = info.stream {
                output.write(line.as_bytes()).await?;
            } else if let Some(status) = info.status {
                debug!(image = %tag, status = %status, "Build progress");
            }
        }
        Ok(tag)
    }
}


/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u8>>);

    #[async_trait]
    impl OutputSink for Collect {
        async fn write(&self, chunk: &[u8]) -> Result<()> {
            self.0.lock().unwrap().extend_from_slice(chunk);
            Ok(())
        }
    }

    fn executor() -> DockerExecutor {
        DockerExecutor::connect("", None).expect("Should connect to Docker daemon")
    }

    fn shell(script: &str) -> ContainerSpec {
        let mut spec = ContainerSpec::new("alpine:latest");
        spec.cmd = vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()];
        spec
    }

    #[tokio::test]
    #[ignore]
    async fn test_run_attach_wait() {
        let executor = executor();
        let mut spec = shell("echo out; echo err >&2; echo $GREETING");
        spec.env = vec!["GREETING=hello_world".to_string()];

        let handle = executor.run(spec).await.unwrap();
        let (stdout, stderr) = (Collect::default(), Collect::default());
        executor.attach(&handle, &stdout, &stderr).await.unwrap();

        assert_eq!(executor.wait(&handle).await.unwrap(), 0);
        let out = String::from_utf8(stdout.0.into_inner().unwrap()).unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("hello_world"));
        assert!(String::from_utf8_lossy(&stderr.0.into_inner().unwrap()).contains("err"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_non_zero_exit_code() {
        let executor = executor();
        let handle = executor.run(shell("exit 42")).await.unwrap();
        assert_eq!(executor.wait(&handle).await.unwrap(), 42);
    }

    #[tokio::test]
    #[ignore]
    async fn test_kill_running_container() {
        let executor = executor();
        let handle = executor.run(shell("sleep 300")).await.unwrap();
        executor.kill(&handle).await.unwrap();
        assert_ne!(executor.wait(&handle).await.unwrap(), 0);
    }
}
