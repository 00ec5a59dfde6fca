//! Deterministic OCI image naming (spec §4.3 step 4, §9).
//!
//! The rule is load-bearing: two workers building the same `(repo, commit)`
//! must produce byte-identical names so the `images.hash` dedup key actually
//! dedups. Do not change the sanitisation rules without also migrating every
//! previously built image's tag.

/// Lower-cases `s` and replaces every byte that is not `[a-z0-9]` with `-`.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() {
                lower
            } else {
                '-'
            }
        })
        .collect()
}

/// Splits `owner/repo` into its two sanitized components. Anything that is
/// not a clean two-segment `owner/repo` string is treated as a single
/// segment repo with no owner, sanitized as a whole.
fn split_repository(repository: &str) -> (String, String) {
    match repository.split_once('/') {
        Some((owner, repo)) => (sanitize(owner), sanitize(repo)),
        None => (String::new(), sanitize(repository)),
    }
}

/// Builds `<registry>/zeitwork-image-<sanitized-owner>-<sanitized-repo>:<full-commit-sha>`.
///
/// `registry` is an optional prefix (e.g. `registry.example.com/zeitwork`);
/// when `None` the name has no registry prefix, per the open question in
/// spec §9(b) — this workspace always includes the registry prefix when one
/// is configured and never an organisation prefix, since the dedup key is
/// the image hash, not the name.
pub fn generate_image_name(registry: Option<&str>, repository: &str, commit_sha: &str) -> String {
    let (owner, repo) = split_repository(repository);
    let tag = if owner.is_empty() {
        format!("zeitwork-image-{repo}")
    } else {
        format!("zeitwork-image-{owner}-{repo}")
    };

    match registry {
        Some(registry) => format!("{registry}/{tag}:{commit_sha}"),
        None => format!("{tag}:{commit_sha}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_owner_and_repo() {
        let name = generate_image_name(None, "Acme.Corp/App Server", "deadbeefcafe");
        assert_eq!(name, "zeitwork-image-acme-corp-app-server:deadbeefcafe");
    }

    #[test]
    fn includes_registry_prefix_when_configured() {
        let name = generate_image_name(
            Some("registry.example.com"),
            "acme/app",
            "abc123",
        );
        assert_eq!(
            name,
            "registry.example.com/zeitwork-image-acme-app:abc123"
        );
    }

    #[test]
    fn is_deterministic_across_calls() {
        let a = generate_image_name(None, "acme/app", "abc123");
        let b = generate_image_name(None, "acme/app", "abc123");
        assert_eq!(a, b);
    }

    #[test]
    fn handles_repository_without_owner() {
        let name = generate_image_name(None, "standalone", "deadbeef");
        assert_eq!(name, "zeitwork-image-standalone:deadbeef");
    }
}
