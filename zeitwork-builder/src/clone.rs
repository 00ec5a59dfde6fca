//! Shallow git clone into a per-build workspace (spec §4.3 step 2).

use std::path::{Path, PathBuf};

use tokio::process::Command;
use zeitwork_common::{Error, ErrorKind, Result};

/// Clones `clone_url` shallowly at `commit_sha` into `<work_dir>/<build_id>`,
/// returning the checkout path. The clone URL is expected to already carry
/// credentials (see [`crate::github::authenticated_clone_url`]) and is
/// never logged.
pub async fn shallow_clone(
    work_dir: &Path,
    build_id: uuid::Uuid,
    clone_url: &str,
    commit_sha: &str,
) -> Result<PathBuf> {
    let checkout = work_dir.join(build_id.to_string());
    tokio::fs::create_dir_all(&checkout)
        .await
        .map_err(|e| Error::source(ErrorKind::External, e))?;

    run_git(&checkout, &["init", "--quiet"]).await?;
    run_git(&checkout, &["remote", "add", "origin", clone_url]).await?;
    run_git(
        &checkout,
        &["fetch", "--quiet", "--depth", "1", "origin", commit_sha],
    )
    .await?;
    run_git(&checkout, &["checkout", "--quiet", "FETCH_HEAD"]).await?;

    Ok(checkout)
}

async fn run_git(dir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::source(ErrorKind::External, e))?;

    if !output.status.success() {
        return Err(Error::custom(
            ErrorKind::External,
            format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    Ok(())
}

/// Best-effort scrub of a build's workspace (spec §4.3 step 8: "On any
/// error, mark failed and scrub the workspace"). Failing to clean up is
/// logged, not propagated — a leftover directory is not worth failing the
/// build result over.
pub async fn scrub_workspace(work_dir: &Path, build_id: uuid::Uuid) {
    let checkout = work_dir.join(build_id.to_string());
    if let Err(err) = tokio::fs::remove_dir_all(&checkout).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(%err, build_id = %build_id, "failed to scrub build workspace");
        }
    }
}

/// Removes checkout directories left behind by a worker that crashed before
/// its own `scrub_workspace` call ran (spec §6 `CLEANUP_INTERVAL`). A
/// directory only qualifies once it is older than `min_age`, so it never
/// races an in-flight build.
pub async fn sweep_orphaned_workspaces(work_dir: &Path, min_age: std::time::Duration) {
    let mut entries = match tokio::fs::read_dir(work_dir).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(%err, "failed to read builder work_dir for cleanup sweep");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%err, "failed to iterate builder work_dir for cleanup sweep");
                break;
            }
        };

        let path = entry.path();
        if uuid::Uuid::parse_str(&entry.file_name().to_string_lossy()).is_err() {
            continue; // not one of our checkout directories
        }

        let age = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => match modified.elapsed() {
                Ok(age) => age,
                Err(_) => continue, // modified in the future, clock skew; skip
            },
            Err(_) => continue,
        };

        if age < min_age {
            continue;
        }

        if let Err(err) = tokio::fs::remove_dir_all(&path).await {
            tracing::warn!(%err, path = %path.display(), "failed to sweep orphaned build workspace");
        } else {
            tracing::info!(path = %path.display(), "swept orphaned build workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_removes_only_aged_uuid_directories() {
        let dir = tempfile::tempdir().unwrap();

        let stale = uuid::Uuid::now_v7();
        tokio::fs::create_dir_all(dir.path().join(stale.to_string())).await.unwrap();

        let fresh = uuid::Uuid::now_v7();
        tokio::fs::create_dir_all(dir.path().join(fresh.to_string())).await.unwrap();

        tokio::fs::create_dir_all(dir.path().join("not-a-uuid")).await.unwrap();

        // everything just got created, so a zero min_age sweeps the UUID
        // dirs but must still leave the non-UUID one alone.
        sweep_orphaned_workspaces(dir.path(), std::time::Duration::ZERO).await;

        assert!(!dir.path().join(stale.to_string()).exists());
        assert!(!dir.path().join(fresh.to_string()).exists());
        assert!(dir.path().join("not-a-uuid").exists());
    }

    #[tokio::test]
    async fn sweep_leaves_directories_younger_than_min_age() {
        let dir = tempfile::tempdir().unwrap();
        let build_id = uuid::Uuid::now_v7();
        tokio::fs::create_dir_all(dir.path().join(build_id.to_string())).await.unwrap();

        sweep_orphaned_workspaces(dir.path(), std::time::Duration::from_secs(3600)).await;

        assert!(dir.path().join(build_id.to_string()).exists());
    }
}
