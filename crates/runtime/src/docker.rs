//! Docker Engine runtime backed by `bollard`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use convoy_core::ContainerHandle;
use futures::StreamExt;
use tracing::{debug, info};

use crate::client::{
    ContainerSpec, EventStream, LogLine, LogSource, LogStream, RawEvent, RuntimeClient,
};
use crate::error::{Result, RuntimeError};

const NOT_FOUND: u16 = 404;

/// Runtime talking to a single Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the local socket).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Connect`] if no client can be configured.
    pub fn connect() -> Result<Self> {
        Docker::connect_with_local_defaults()
            .map(Self::from_client)
            .map_err(|e| RuntimeError::connect(e.to_string()))
    }

    /// Wrap an existing client.
    pub const fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Pull `image` unless the daemon already has it.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: NOT_FOUND,
                ..
            }) => {}
            Err(e) => return Err(RuntimeError::pull(image, e.to_string())),
        }

        let reference = pull_reference(image);
        info!(image = %reference, "Pulling image");
        let options = CreateImageOptions {
            from_image: reference.as_str(),
            ..Default::default()
        };

        let mut progress = std::pin::pin!(self.docker.create_image(Some(options), None, None));
        while let Some(item) = progress.next().await {
            let update = item.map_err(|e| RuntimeError::pull(&reference, e.to_string()))?;
            if let Some(status) = update.status {
                debug!(image = %reference, status = %status, "Pull progress");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::create(&spec.name, e.to_string()))?;

        for warning in &response.warnings {
            debug!(container = %spec.name, warning = %warning, "Runtime warning on create");
        }

        Ok(ContainerHandle::new(response.id))
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.docker
            .start_container(handle.id(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::start(handle.id(), e.to_string()))
    }

    async fn kill_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.docker
            .kill_container(handle.id(), None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::stop(handle.id(), e.to_string()))
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(handle.id(), Some(options))
            .await
            .map_err(|e| RuntimeError::remove(handle.id(), e.to_string()))
    }

    async fn container_logs(&self, handle: &ContainerHandle) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let container = handle.id().to_string();

        let stream = self
            .docker
            .logs(handle.id(), Some(options))
            .flat_map(move |item| {
                let lines = match item {
                    Ok(output) => log_lines(output).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(RuntimeError::logs(&container, e.to_string()))],
                };
                futures::stream::iter(lines)
            })
            .boxed();

        Ok(stream)
    }

    async fn subscribe_events(&self, since: i64) -> Result<EventStream> {
        let filters = HashMap::from([("type".to_string(), vec!["container".to_string()])]);
        let options = EventsOptions::<String> {
            since: Some(since.to_string()),
            until: None,
            filters,
        };

        let stream = self
            .docker
            .events(Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(message) => raw_event(message).map(Ok),
                    Err(e) => Some(Err(RuntimeError::events(e.to_string()))),
                }
            })
            .boxed();

        Ok(stream)
    }
}

/// Reduce a daemon event to its action and the actor's `name` and
/// `exitCode` attributes.
///
/// Non-container events and events without an action yield nothing.
fn raw_event(message: EventMessage) -> Option<RawEvent> {
    if !matches!(message.typ, None | Some(EventMessageTypeEnum::CONTAINER)) {
        return None;
    }
    let status = message.action?;
    let mut attributes = message
        .actor
        .and_then(|actor| actor.attributes)
        .unwrap_or_default();

    Some(RawEvent {
        status,
        actor_name: attributes.remove("name"),
        exit_code: attributes
            .remove("exitCode")
            .and_then(|code| code.parse().ok()),
    })
}

/// Image reference with an explicit tag. An untagged pull would fetch every
/// tag of the repository.
fn pull_reference(image: &str) -> String {
    let name = image.rsplit('/').next().unwrap_or(image);
    if image.contains('@') || name.contains(':') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

/// Split one log frame into lines.
fn log_lines(output: LogOutput) -> Vec<LogLine> {
    let (source, message) = match output {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            (LogSource::Stdout, message)
        }
        LogOutput::StdErr { message } => (LogSource::Stderr, message),
        LogOutput::StdIn { .. } => return Vec::new(),
    };

    String::from_utf8_lossy(&message)
        .lines()
        .map(|text| LogLine {
            source,
            text: text.to_string(),
        })
        .collect()
}
