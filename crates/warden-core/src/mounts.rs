//! Bind-mount validation.
//!
//! Every host path exposed to a sandbox goes through [`MountPolicy`]. The
//! policy refuses anything at, under, or above a forbidden root (install
//! directory, credentials, configuration, task state, root's home). The
//! tools directory is the one exception: it may live under a forbidden root,
//! but is only ever mounted read-only.
//!
//! [`MountSpec`] has no public constructor, so a mount that reaches the
//! runtime has always been validated here.

use crate::error::{CoreError, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Access mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MountMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl MountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a requested host path should appear, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub container_path: PathBuf,
    /// `None` means [`MountMode::ReadWrite`].
    pub mode: Option<MountMode>,
}

impl MountRequest {
    pub fn new(container_path: impl Into<PathBuf>) -> Self {
        Self {
            container_path: container_path.into(),
            mode: None,
        }
    }

    pub fn read_only(container_path: impl Into<PathBuf>) -> Self {
        Self {
            container_path: container_path.into(),
            mode: Some(MountMode::ReadOnly),
        }
    }

    pub fn read_write(container_path: impl Into<PathBuf>) -> Self {
        Self {
            container_path: container_path.into(),
            mode: Some(MountMode::ReadWrite),
        }
    }
}

impl From<&str> for MountRequest {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for MountRequest {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for MountRequest {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<(&str, MountMode)> for MountRequest {
    fn from((path, mode): (&str, MountMode)) -> Self {
        Self {
            container_path: path.into(),
            mode: Some(mode),
        }
    }
}

/// A validated bind mount. Only [`MountPolicy`] can create one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    host_path: PathBuf,
    container_path: PathBuf,
    mode: MountMode,
}

impl MountSpec {
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    pub fn container_path(&self) -> &Path {
        &self.container_path
    }

    pub fn mode(&self) -> MountMode {
        self.mode
    }

    /// `host:container:mode`, the runtime's bind syntax.
    pub fn bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path.display(),
            self.mode
        )
    }
}

/// Host paths that must never be visible inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenPaths {
    pub install_dir: PathBuf,
    pub credential_file: PathBuf,
    pub config_dir: PathBuf,
    pub task_state_dir: PathBuf,
    /// Defaults to `/root`.
    pub root_home: PathBuf,
    /// Read-only tools directory, exempt from the forbidden roots.
    pub tools_root: Option<PathBuf>,
    pub extra: Vec<PathBuf>,
}

impl ForbiddenPaths {
    pub fn new(
        install_dir: impl Into<PathBuf>,
        credential_file: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
        task_state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            credential_file: credential_file.into(),
            config_dir: config_dir.into(),
            task_state_dir: task_state_dir.into(),
            root_home: PathBuf::from("/root"),
            tools_root: None,
            extra: Vec::new(),
        }
    }

    pub fn with_tools_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.tools_root = Some(path.into());
        self
    }

    pub fn with_root_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_home = path.into();
        self
    }

    /// Forbid an additional host path.
    pub fn with_extra(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra.push(path.into());
        self
    }

    fn roots(&self) -> Vec<(&'static str, &Path)> {
        let mut roots = vec![
            ("install directory", self.install_dir.as_path()),
            ("credential file", self.credential_file.as_path()),
            ("configuration directory", self.config_dir.as_path()),
            ("task state directory", self.task_state_dir.as_path()),
            ("root home", self.root_home.as_path()),
        ];
        roots.extend(self.extra.iter().map(|p| ("forbidden path", p.as_path())));
        roots
    }
}

/// Validates requested bind mounts against [`ForbiddenPaths`].
#[derive(Debug, Clone)]
pub struct MountPolicy {
    forbidden: ForbiddenPaths,
}

impl MountPolicy {
    pub fn new(forbidden: ForbiddenPaths) -> Self {
        Self { forbidden }
    }

    pub fn forbidden(&self) -> &ForbiddenPaths {
        &self.forbidden
    }

    /// Validate a set of requested mounts, preserving their order.
    ///
    /// Either every mount is valid and the full list is returned, or nothing
    /// is returned and the first offending request is reported.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SecurityViolation`] if a host path touches a forbidden
    ///   root, or a tools-directory path is requested writable.
    /// - [`CoreError::Configuration`] for relative paths or a container path
    ///   used twice.
    pub fn build_mounts<I, P, R>(&self, requested: I) -> Result<Vec<MountSpec>>
    where
        I: IntoIterator<Item = (P, R)>,
        P: Into<PathBuf>,
        R: Into<MountRequest>,
    {
        let mut mounts = Vec::new();
        let mut targets = HashSet::new();

        for (host, request) in requested {
            let host: PathBuf = host.into();
            let request: MountRequest = request.into();
            let mode = request.mode.unwrap_or_default();

            let host_path = self.check_host_path(&host, mode)?;
            let container_path = check_container_path(&request.container_path)?;
            if !targets.insert(container_path.clone()) {
                return Err(CoreError::Configuration(format!(
                    "container path {} is mounted more than once",
                    container_path.display()
                )));
            }

            tracing::trace!(
                host = %host_path.display(),
                container = %container_path.display(),
                mode = %mode,
                "Mount accepted"
            );
            mounts.push(MountSpec {
                host_path,
                container_path,
                mode,
            });
        }

        Ok(mounts)
    }

    /// Check one host path and return its normalized form.
    fn check_host_path(&self, host: &Path, mode: MountMode) -> Result<PathBuf> {
        let normalized = normalize_absolute(host).ok_or_else(|| {
            CoreError::Configuration(format!(
                "host mount path {} must be absolute",
                host.display()
            ))
        })?;
        let forms = path_forms(&normalized);

        if let Some(tools_root) = &self.forbidden.tools_root {
            let tools_forms = normalize_absolute(tools_root)
                .map(|p| path_forms(&p))
                .unwrap_or_default();
            let under_tools = !tools_forms.is_empty()
                && forms
                    .iter()
                    .all(|f| tools_forms.iter().any(|t| f.starts_with(t)));
            if under_tools {
                if mode != MountMode::ReadOnly {
                    tracing::warn!(path = %host.display(), "Refusing writable tools mount");
                    return Err(CoreError::security(
                        host,
                        "tools directory must be mounted read-only",
                    ));
                }
                return Ok(normalized);
            }
            let above_tools = forms
                .iter()
                .any(|f| tools_forms.iter().any(|t| t.starts_with(f)));
            if above_tools && mode != MountMode::ReadOnly {
                tracing::warn!(path = %host.display(), "Refusing writable mount above tools directory");
                return Err(CoreError::security(
                    host,
                    "would expose the tools directory writable",
                ));
            }
        }

        for (label, root) in self.forbidden.roots() {
            let Some(root) = normalize_absolute(root) else {
                continue;
            };
            for root_form in path_forms(&root) {
                for form in &forms {
                    if form.starts_with(&root_form) {
                        tracing::warn!(path = %host.display(), root = %root_form.display(), "Refusing forbidden mount");
                        return Err(CoreError::security(
                            host,
                            format!("inside {label} {}", root_form.display()),
                        ));
                    }
                    if root_form.starts_with(form) {
                        tracing::warn!(path = %host.display(), root = %root_form.display(), "Refusing mount above forbidden root");
                        return Err(CoreError::security(
                            host,
                            format!("would expose {label} {}", root_form.display()),
                        ));
                    }
                }
            }
        }

        Ok(normalized)
    }
}

fn check_container_path(path: &Path) -> Result<PathBuf> {
    let normalized = normalize_absolute(path).ok_or_else(|| {
        CoreError::Configuration(format!(
            "container mount path {} must be absolute",
            path.display()
        ))
    })?;
    if normalized == Path::new("/") {
        return Err(CoreError::Configuration(
            "cannot bind mount over the container root".into(),
        ));
    }
    Ok(normalized)
}

/// Lexically resolve `.` and `..` in an absolute path.
fn normalize_absolute(path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Some(out)
}

/// The lexical form plus its symlink-resolved form, if different.
///
/// A path that does not exist yet is resolved through its deepest existing
/// ancestor, with the missing components appended back.
fn path_forms(normalized: &Path) -> Vec<PathBuf> {
    let mut forms = vec![normalized.to_path_buf()];
    if let Some(real) = resolve_existing_prefix(normalized) {
        if real != normalized {
            forms.push(real);
        }
    }
    forms
}

fn resolve_existing_prefix(normalized: &Path) -> Option<PathBuf> {
    let mut existing = normalized;
    let mut missing = Vec::new();
    loop {
        if let Ok(mut real) = std::fs::canonicalize(existing) {
            real.extend(missing.iter().rev());
            return Some(real);
        }
        missing.push(existing.file_name()?);
        existing = existing.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forbidden() -> ForbiddenPaths {
        ForbiddenPaths::new(
            "/opt/warden",
            "/home/agent/.warden/credentials.json",
            "/home/agent/.config/warden",
            "/var/lib/warden/tasks",
        )
        .with_tools_root("/opt/warden/tools")
    }

    fn policy() -> MountPolicy {
        MountPolicy::new(forbidden())
    }

    #[test]
    fn test_default_mode_is_rw() {
        let mounts = policy()
            .build_mounts([("/workspace/proj", "/workspace")])
            .unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].host_path(), Path::new("/workspace/proj"));
        assert_eq!(mounts[0].container_path(), Path::new("/workspace"));
        assert_eq!(mounts[0].mode(), MountMode::ReadWrite);
        assert_eq!(mounts[0].bind(), "/workspace/proj:/workspace:rw");
    }

    #[test]
    fn test_order_preserved() {
        let mounts = policy()
            .build_mounts(vec![
                ("/data/b", MountRequest::new("/b")),
                ("/data/a", MountRequest::read_only("/a")),
                ("/data/c", MountRequest::new("/c")),
            ])
            .unwrap();
        let targets: Vec<_> = mounts.iter().map(|m| m.container_path()).collect();
        assert_eq!(
            targets,
            vec![Path::new("/b"), Path::new("/a"), Path::new("/c")]
        );
    }

    #[test]
    fn test_forbidden_roots_rejected_in_any_mode() {
        let cases = [
            "/opt/warden",
            "/opt/warden/bin",
            "/home/agent/.warden/credentials.json",
            "/home/agent/.config/warden/settings.toml",
            "/var/lib/warden/tasks/123",
            "/root",
            "/root/.ssh",
        ];
        for host in cases {
            for request in [
                MountRequest::new("/mnt"),
                MountRequest::read_only("/mnt"),
                MountRequest::read_write("/mnt"),
            ] {
                let err = policy().build_mounts([(host, request)]).unwrap_err();
                assert!(
                    matches!(err, CoreError::SecurityViolation { .. }),
                    "{host} should be refused, got {err:?}"
                );
            }
        }
    }

    #[test]
    fn test_tools_root_requires_ro() {
        let ok = policy()
            .build_mounts([("/opt/warden/tools/node", MountRequest::read_only("/tools/node"))])
            .unwrap();
        assert_eq!(ok[0].mode(), MountMode::ReadOnly);

        for request in [
            MountRequest::new("/tools"),
            MountRequest::read_write("/tools"),
        ] {
            let err = policy()
                .build_mounts([("/opt/warden/tools", request)])
                .unwrap_err();
            assert!(matches!(err, CoreError::SecurityViolation { ref reason, .. } if reason.contains("read-only")));
        }
    }

    #[test]
    fn test_dotdot_cannot_escape_tools_root() {
        let err = policy()
            .build_mounts([(
                "/opt/warden/tools/../bin",
                MountRequest::read_only("/bin-host"),
            )])
            .unwrap_err();
        assert!(matches!(err, CoreError::SecurityViolation { .. }));
    }

    #[test]
    fn test_dotdot_into_forbidden_root() {
        let err = policy()
            .build_mounts([("/workspace/../root/.aws", "/aws")])
            .unwrap_err();
        assert!(matches!(err, CoreError::SecurityViolation { .. }));
    }

    #[test]
    fn test_ancestor_of_forbidden_root_rejected() {
        for host in ["/", "/opt", "/home/agent", "/var/lib"] {
            let err = policy().build_mounts([(host, "/mnt")]).unwrap_err();
            assert!(
                matches!(err, CoreError::SecurityViolation { ref reason, .. } if reason.contains("would expose")),
                "{host} should be refused"
            );
        }
    }

    #[test]
    fn test_sibling_prefix_is_not_nested() {
        // "/opt/warden-data" shares a string prefix with "/opt/warden" but is not under it
        let mounts = policy()
            .build_mounts([("/opt/warden-data", "/data")])
            .unwrap();
        assert_eq!(mounts.len(), 1);
    }

    #[test]
    fn test_relative_paths_rejected() {
        let err = policy().build_mounts([("proj", "/workspace")]).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));

        let err = policy().build_mounts([("/proj", "workspace")]).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_container_path_rejected() {
        let err = policy()
            .build_mounts(vec![("/data/a", "/mnt"), ("/data/b", "/mnt/")])
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_container_root_rejected() {
        let err = policy().build_mounts([("/data", "/")]).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_one_bad_mount_fails_whole_set() {
        let result = policy().build_mounts(vec![
            ("/workspace/proj", MountRequest::new("/workspace")),
            ("/root/.ssh", MountRequest::read_only("/ssh")),
        ]);
        assert!(matches!(result, Err(CoreError::SecurityViolation { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_into_forbidden_root() {
        let base = std::env::temp_dir().join(format!("warden-mounts-{}", std::process::id()));
        let secret = base.join("secret");
        let link = base.join("innocent");
        std::fs::create_dir_all(&secret).unwrap();
        let _ = std::fs::remove_file(&link);
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        let policy = MountPolicy::new(forbidden().with_extra(&secret));
        let err = policy.build_mounts([(&link, "/mnt")]).unwrap_err();
        assert!(matches!(err, CoreError::SecurityViolation { .. }));

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_missing_child_into_forbidden_root() {
        let base = std::env::temp_dir().join(format!("warden-mounts-child-{}", std::process::id()));
        let secret = base.join("secret");
        let link = base.join("innocent");
        std::fs::create_dir_all(&secret).unwrap();
        let _ = std::fs::remove_file(&link);
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        // "newdir" does not exist, so only the parent can be resolved
        let policy = MountPolicy::new(forbidden().with_extra(&secret));
        for request in [MountRequest::new("/mnt"), MountRequest::read_only("/mnt")] {
            let err = policy
                .build_mounts([(link.join("newdir"), request)])
                .unwrap_err();
            assert!(
                matches!(err, CoreError::SecurityViolation { ref reason, .. } if reason.contains("inside")),
                "unexpected error: {err:?}"
            );
        }

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_resolve_missing_tail() {
        let resolved = resolve_existing_prefix(Path::new("/warden-missing-dir/a/b")).unwrap();
        assert!(resolved.ends_with("warden-missing-dir/a/b"));
        assert_eq!(resolve_existing_prefix(Path::new("/")), Some(PathBuf::from("/")));
    }

    #[test]
    fn test_ancestor_of_tools_root_must_be_ro() {
        let policy = MountPolicy::new(
            ForbiddenPaths::new(
                "/opt/warden",
                "/etc/warden/credentials.json",
                "/etc/warden",
                "/var/lib/warden",
            )
            .with_tools_root("/srv/tools"),
        );

        for request in [MountRequest::new("/srv"), MountRequest::read_write("/srv")] {
            let err = policy.build_mounts([("/srv", request)]).unwrap_err();
            assert!(
                matches!(err, CoreError::SecurityViolation { ref reason, .. } if reason.contains("tools directory")),
                "unexpected error: {err:?}"
            );
        }

        let ok = policy
            .build_mounts([("/srv", MountRequest::read_only("/srv"))])
            .unwrap();
        assert_eq!(ok[0].mode(), MountMode::ReadOnly);

        // a sibling of the tools root is unaffected
        let ok = policy.build_mounts([("/srv/data", "/data")]).unwrap();
        assert_eq!(ok[0].mode(), MountMode::ReadWrite);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(MountMode::ReadOnly.to_string(), "ro");
        assert_eq!(MountMode::ReadWrite.to_string(), "rw");
        assert_eq!(MountMode::default(), MountMode::ReadWrite);
    }
}
