//! Per-session container configuration.
//!
//! Every session builds its own [`ContainerSpec`] and [`AttachSpec`]; nothing
//! here is shared or mutated across sessions.

use crate::container::{MountSpec, Result, SandboxError};
use bollard::models::{ContainerCreateBody, HostConfig};
use std::time::Duration;

/// Default shell started in the session container.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Default engine-side detach key sequence.
pub const DEFAULT_DETACH_KEYS: &str = "ctrl-d";

/// Behaviour knobs for one sandbox session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Command run as the container's main process
    pub shell: Vec<String>,
    /// Detach key sequence passed to the engine on attach
    pub detach_keys: String,
    /// Commit the stopped container to a new image
    pub commit: bool,
    /// Also commit when local input is not a terminal
    pub commit_when_headless: bool,
    /// How long pump tasks may keep draining after the container stopped
    pub drain_timeout: Duration,
    /// Grace period for stop requests issued on interruption or failed attach
    pub stop_timeout_secs: i32,
    /// Print progress lines to stdout
    pub announce: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            shell: vec![DEFAULT_SHELL.to_string()],
            detach_keys: DEFAULT_DETACH_KEYS.to_string(),
            commit: true,
            commit_when_headless: true,
            drain_timeout: Duration::from_millis(250),
            stop_timeout_secs: 0,
            announce: true,
        }
    }
}

impl SessionOptions {
    /// Whether the stopped container should be committed.
    pub fn should_commit(&self, interactive: bool) -> bool {
        self.commit && (interactive || self.commit_when_headless)
    }
}

/// Container creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Base image reference
    pub image: String,
    /// Hostname inside the container
    pub hostname: Option<String>,
    /// Main process command
    pub cmd: Vec<String>,
    /// Bind mounts
    pub mounts: Vec<MountSpec>,
    /// Allocate a pseudo-terminal
    pub tty: bool,
    /// Keep stdin open for attach
    pub open_stdin: bool,
}

impl ContainerSpec {
    /// Start building a container spec.
    pub fn builder() -> ContainerSpecBuilder {
        ContainerSpecBuilder::default()
    }

    /// Interactive shell container for a session, named and hostnamed after it.
    pub fn for_session(
        name: &str,
        image: &str,
        mounts: Vec<MountSpec>,
        options: &SessionOptions,
    ) -> Result<Self> {
        Self::builder()
            .name(name)
            .hostname(name)
            .image(image)
            .cmd(options.shell.clone())
            .mounts(mounts)
            .tty(true)
            .build()
    }

    /// Engine representation of the container configuration.
    pub fn to_create_body(&self) -> ContainerCreateBody {
        let mounts: Vec<_> = self.mounts.iter().map(MountSpec::to_mount).collect();

        ContainerCreateBody {
            image: Some(self.image.clone()),
            hostname: self.hostname.clone(),
            cmd: Some(self.cmd.clone()),
            tty: Some(self.tty),
            open_stdin: Some(self.open_stdin),
            attach_stdin: Some(self.open_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                mounts: if mounts.is_empty() { None } else { Some(mounts) },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Builder for [`ContainerSpec`].
#[derive(Debug, Default)]
pub struct ContainerSpecBuilder {
    name: Option<String>,
    image: Option<String>,
    hostname: Option<String>,
    cmd: Vec<String>,
    mounts: Vec<MountSpec>,
    tty: bool,
}

impl ContainerSpecBuilder {
    /// Set the container name.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the base image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the hostname.
    pub fn hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the main process command.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Add bind mounts.
    pub fn mounts<I: IntoIterator<Item = MountSpec>>(mut self, mounts: I) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Allocate a pseudo-terminal and keep stdin open.
    pub fn tty(mut self, enable: bool) -> Self {
        self.tty = enable;
        self
    }

    /// Build the container spec.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Config`] if name, image or command is missing.
    pub fn build(self) -> Result<ContainerSpec> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SandboxError::Config("Container name is required".to_string()))?;
        let image = self
            .image
            .filter(|i| !i.is_empty())
            .ok_or_else(|| SandboxError::Config("Image is required".to_string()))?;
        if self.cmd.is_empty() {
            return Err(SandboxError::Config("Shell command is required".to_string()));
        }

        Ok(ContainerSpec {
            name,
            image,
            hostname: self.hostname,
            cmd: self.cmd,
            mounts: self.mounts,
            tty: self.tty,
            open_stdin: self.tty,
        })
    }
}

/// Attach request for the session's main process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachSpec {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub detach_keys: String,
}

impl AttachSpec {
    /// Full interactive attach.
    pub fn interactive(detach_keys: &str) -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
            detach_keys: detach_keys.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_spec() {
        let options = SessionOptions::default();
        let spec = ContainerSpec::for_session(
            "box",
            "alpine:latest",
            vec![MountSpec::new("/src", "/work")],
            &options,
        )
        .unwrap();

        assert_eq!(spec.hostname.as_deref(), Some("box"));
        assert_eq!(spec.cmd, vec!["/bin/sh".to_string()]);
        assert!(spec.tty);
        assert!(spec.open_stdin);

        let body = spec.to_create_body();
        assert_eq!(body.image.as_deref(), Some("alpine:latest"));
        assert_eq!(body.attach_stdin, Some(true));
        let mounts = body.host_config.unwrap().mounts.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].target.as_deref(), Some("/work"));
    }

    #[test]
    fn test_no_mounts_leaves_host_mounts_unset() {
        let spec = ContainerSpec::builder()
            .name("box")
            .image("alpine:latest")
            .cmd(["sh"])
            .build()
            .unwrap();
        assert!(spec.to_create_body().host_config.unwrap().mounts.is_none());
    }

    #[test]
    fn test_missing_fields() {
        assert!(matches!(
            ContainerSpec::builder().image("alpine").cmd(["sh"]).build(),
            Err(SandboxError::Config(_))
        ));
        assert!(matches!(
            ContainerSpec::builder().name("box").cmd(["sh"]).build(),
            Err(SandboxError::Config(_))
        ));
        assert!(matches!(
            ContainerSpec::builder().name("box").image("alpine").build(),
            Err(SandboxError::Config(_))
        ));
    }

    #[test]
    fn test_commit_policy() {
        let mut options = SessionOptions::default();
        assert!(options.should_commit(true));
        assert!(options.should_commit(false));

        options.commit_when_headless = false;
        assert!(options.should_commit(true));
        assert!(!options.should_commit(false));

        options.commit = false;
        assert!(!options.should_commit(true));
    }
}
