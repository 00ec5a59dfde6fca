//! Builds and inspects the OCI image for a claimed build (spec §4.3 steps
//! 3-6), via the local Docker daemon through `bollard`.

use std::path::Path;

use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions};
use bollard::Docker;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use zeitwork_common::{Error, ErrorKind, Result};

/// True once a `Dockerfile` exists at `root_directory` within `checkout`
/// (spec §4.3 step 3: "if no Dockerfile at the project's root_directory,
/// mark build failed").
pub fn has_dockerfile(checkout: &Path, root_directory: &str) -> bool {
    checkout.join(root_directory).join("Dockerfile").exists()
}

/// Tars up `checkout/root_directory` and asks Docker to build it, tagged
/// `image_name` (spec §4.3 step 4).
pub async fn build_image(
    docker: &Docker,
    checkout: &Path,
    root_directory: &str,
    image_name: &str,
) -> Result<()> {
    let context_dir = checkout.join(root_directory);
    let tar_bytes = tar_directory(&context_dir)?;

    let options = BuildImageOptions {
        dockerfile: "Dockerfile",
        t: image_name,
        rm: true,
        ..Default::default()
    };

    let mut stream = docker.build_image(options, None, Some(tar_bytes.into()));
    while let Some(chunk) = stream.next().await {
        let info = chunk.map_err(|e| Error::source(ErrorKind::External, e))?;
        if let Some(error) = info.error {
            return Err(Error::custom(ErrorKind::External, error));
        }
    }
    Ok(())
}

fn tar_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", dir)
        .map_err(|e| Error::source(ErrorKind::External, e))?;
    builder
        .into_inner()
        .map_err(|e| Error::source(ErrorKind::External, e))
}

/// Image size in bytes and a stable sha256 content hash (spec §4.3 step 5).
/// The hash is computed over the image id Docker reports, which is itself
/// a content digest of the image's layers and config.
pub async fn inspect_image(docker: &Docker, image_name: &str) -> Result<(i64, String)> {
    let inspect = docker
        .inspect_image(image_name)
        .await
        .map_err(|e| Error::source(ErrorKind::External, e))?;

    let size = inspect.size.unwrap_or(0);
    let image_id = inspect
        .id
        .ok_or_else(|| Error::custom(ErrorKind::Internal, "docker inspect returned no image id"))?;

    let mut hasher = Sha256::new();
    hasher.update(image_id.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok((size, hash))
}

/// Pushes `image_name` to its configured registry (spec §4.3 step 6),
/// authenticating with `credentials` when the registry requires it
/// (`BUILDER_REGISTRY_USER`/`BUILDER_REGISTRY_PASS`).
pub async fn push_image(
    docker: &Docker,
    image_name: &str,
    credentials: Option<DockerCredentials>,
) -> Result<()> {
    let (repo, tag) = image_name
        .rsplit_once(':')
        .ok_or_else(|| Error::custom(ErrorKind::Internal, "image name missing a tag"))?;

    let options = PushImageOptions { tag };
    let mut stream = docker.push_image(repo, Some(options), credentials);
    while let Some(chunk) = stream.next().await {
        let info = chunk.map_err(|e| Error::source(ErrorKind::External, e))?;
        if let Some(error) = info.error {
            return Err(Error::custom(ErrorKind::External, error));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_missing_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_dockerfile(dir.path(), "."));

        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        assert!(has_dockerfile(dir.path(), "."));
    }

    #[test]
    fn detects_dockerfile_in_root_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/Dockerfile"), "FROM scratch").unwrap();
        assert!(has_dockerfile(dir.path(), "app"));
        assert!(!has_dockerfile(dir.path(), "."));
    }
}
