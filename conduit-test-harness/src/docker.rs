//! A throwaway local container for integration-testing `conduit-docker`
//! against a real Docker daemon instead of a fake `Backend`. Mirrors
//! `sshd.rs`'s shape (spawn, wait for readiness, `rstest` fixture,
//! kill-on-drop) but drives `bollard`'s container lifecycle endpoints
//! instead of shelling out to a local binary.

use std::time::Duration;

use anyhow::Context;
use bollard::Docker;
use bollard::query_parameters::{
    CreateContainerOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::secret::{ContainerCreateBody, HostConfig};
use conduit_docker::{DockerBackend, DockerOpts};
use log::debug;
use rand::Rng;

/// Image every throwaway container is created from. Small, always
/// present in CI registries, and ships a POSIX shell, which is all
/// `conduit-docker`'s predicate/mutator probes need.
const IMAGE: &str = "alpine:3.19";

/// A running throwaway container, removed on drop.
pub struct Container {
    client: Docker,
    pub name: String,
}

impl Container {
    pub async fn spawn() -> anyhow::Result<Self> {
        let client = Docker::connect_with_local_defaults().context("connecting to local docker daemon")?;

        let name = format!("conduit-test-{:x}", rand::thread_rng().gen::<u64>());

        client
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(name.clone()),
                    ..Default::default()
                }),
                ContainerCreateBody {
                    image: Some(IMAGE.to_string()),
                    // keep the container alive; the default alpine
                    // entrypoint exits immediately otherwise.
                    cmd: Some(vec!["sleep".to_string(), "3600".to_string()]),
                    host_config: Some(HostConfig {
                        auto_remove: Some(false),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .context("creating throwaway container")?;

        client
            .start_container(&name, None::<StartContainerOptions>)
            .await
            .context("starting throwaway container")?;

        debug!("spawned throwaway container '{name}' from {IMAGE}");

        // give the daemon a moment to report the container as running
        // before callers probe it.
        tokio::time::sleep(Duration::from_millis(200)).await;

        Ok(Self { client, name })
    }

    pub fn docker_opts(&self) -> DockerOpts {
        DockerOpts {
            container: self.name.clone(),
            user: None,
            docker_host: None,
        }
    }

    pub async fn backend(&self) -> anyhow::Result<DockerBackend> {
        DockerBackend::connect(self.docker_opts())
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("connecting conduit-docker backend to fixture container")
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        let client = self.client.clone();
        let name = self.name.clone();
        // best-effort teardown: spawn a detached cleanup task since Drop
        // can't be async. A leaked throwaway container is a CI cleanup
        // job's problem, not a correctness one.
        tokio::spawn(async move {
            let _ = client
                .stop_container(
                    &name,
                    Some(StopContainerOptions {
                        t: Some(1),
                        ..Default::default()
                    }),
                )
                .await;
            let _ = client
                .remove_container(
                    &name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
        });
    }
}

/// An `rstest` fixture producing a live throwaway container.
#[rstest::fixture]
pub async fn docker_container() -> Container {
    Container::spawn().await.expect("failed to spawn throwaway container")
}

/// An `rstest` fixture producing a [`DockerBackend`] already connected to
/// the fixture container. `_guard` keeps the container alive for the
/// backend's lifetime.
pub struct Connected {
    pub backend: DockerBackend,
    _guard: Container,
}

#[rstest::fixture]
pub async fn docker_backend(#[future] docker_container: Container) -> anyhow::Result<Connected> {
    let container = docker_container.await;
    let backend = container.backend().await?;
    Ok(Connected {
        backend,
        _guard: container,
    })
}
