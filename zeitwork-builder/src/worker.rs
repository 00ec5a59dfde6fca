//! The builder's claim-dequeue-build loop (spec §4.3).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bollard::Docker;
use tokio::sync::Semaphore;
use uuid::Uuid;
use zeitwork_common::image_name::generate_image_name;
use zeitwork_common::Result;
use zeitwork_dal::Dal;

use crate::clone;
use crate::github::{self, GithubAppConfig};
use crate::image;

#[derive(Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub registry_url: Option<String>,
    pub registry_auth: Option<RegistryAuth>,
    pub push_to_registry: bool,
    pub max_concurrent_builds: usize,
    pub build_timeout: Duration,
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub github: Option<GithubAppConfig>,
}

#[derive(Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

/// Runs forever: every `poll_interval`, tries to dequeue a pending build;
/// if one is claimed and a permit is free, spawns it onto the semaphore-
/// gated pool (spec §4.3: "the worker enforces max_concurrent_builds;
/// additional claims are declined and left in pending").
pub async fn run(dal: Dal, docker: Docker, http: reqwest::Client, config: Config) {
    spawn_cleanup_loop(config.work_dir.clone(), config.cleanup_interval, config.build_timeout);

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_builds));
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        ticker.tick().await;

        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            continue; // at capacity; leave the build in pending for next tick
        };

        let build = match dal.dequeue_pending_image_build().await {
            Ok(Some(build)) => build,
            Ok(None) => {
                drop(permit);
                continue;
            }
            Err(err) => {
                tracing::warn!(%err, "failed to dequeue a pending image build");
                drop(permit);
                continue;
            }
        };

        let dal = dal.clone();
        let docker = docker.clone();
        let http = http.clone();
        let config = config.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let build_id = build.id;
            let outcome = tokio::time::timeout(
                config.build_timeout,
                run_one_build(&dal, &docker, &http, &config, build.id, build.deployment_id),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(%err, %build_id, "image build failed");
                    let _ = dal.mark_image_build_failed(build_id).await;
                }
                Err(_) => {
                    tracing::warn!(%build_id, "image build timed out");
                    let _ = dal.mark_image_build_failed(build_id).await;
                }
            }
            clone::scrub_workspace(&config.work_dir, build_id).await;
        });
    }
}

/// Background sweep for workspace directories orphaned by a crashed worker
/// (spec §6 `CLEANUP_INTERVAL`, default 5m). A directory is only swept once
/// it is older than twice the build timeout, so it can never race a build
/// still legitimately in flight.
fn spawn_cleanup_loop(work_dir: PathBuf, cleanup_interval: Duration, build_timeout: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        let min_age = build_timeout * 2;
        loop {
            ticker.tick().await;
            clone::sweep_orphaned_workspaces(&work_dir, min_age).await;
        }
    });
}

async fn run_one_build(
    dal: &Dal,
    docker: &Docker,
    http: &reqwest::Client,
    config: &Config,
    build_id: Uuid,
    deployment_id: Uuid,
) -> Result<()> {
    let deployment = dal
        .get_deployment(deployment_id)
        .await?
        .ok_or_else(|| zeitwork_common::Error::from_kind(zeitwork_common::ErrorKind::NotFound))?;
    let project = dal
        .get_project(deployment.project_id)
        .await?
        .ok_or_else(|| zeitwork_common::Error::from_kind(zeitwork_common::ErrorKind::NotFound))?;

    let clone_url = match (&config.github, project.github_repository.as_str()) {
        (Some(github_config), repository) => {
            let installation_id = dal
                .get_installation_for_organisation(deployment.organisation_id)
                .await?
                .ok_or_else(|| {
                    zeitwork_common::Error::custom(
                        zeitwork_common::ErrorKind::NotFound,
                        "no github installation for organisation",
                    )
                })?;
            let token =
                github::mint_installation_token(http, github_config, installation_id).await?;
            github::authenticated_clone_url(repository, &token)
        }
        (None, repository) => format!("https://github.com/{repository}.git"),
    };

    let checkout = clone::shallow_clone(
        &config.work_dir,
        build_id,
        &clone_url,
        &deployment.github_commit,
    )
    .await?;

    if !image::has_dockerfile(&checkout, &project.root_directory) {
        return Err(zeitwork_common::Error::custom(
            zeitwork_common::ErrorKind::NotFound,
            "no Dockerfile at the project's root_directory",
        ));
    }

    let image_name = generate_image_name(
        config.registry_url.as_deref(),
        &project.github_repository,
        &deployment.github_commit,
    );

    image::build_image(docker, &checkout, &project.root_directory, &image_name).await?;
    let (size, hash) = image::inspect_image(docker, &image_name).await?;

    if config.push_to_registry {
        let credentials = config.registry_auth.as_ref().map(|auth| bollard::auth::DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.clone()),
            serveraddress: config.registry_url.clone(),
            ..Default::default()
        });
        image::push_image(docker, &image_name, credentials).await?;
    }

    let object_key = config.push_to_registry.then(|| image_name.clone());
    let stored_image = dal
        .insert_or_get_image(&image_name, &hash, size, object_key.as_deref())
        .await?;

    dal.mark_image_build_completed(build_id, stored_image.id)
        .await?;

    Ok(())
}
