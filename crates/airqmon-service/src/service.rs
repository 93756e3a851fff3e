//! Service management for airqmon-service.
//!
//! Each background role can be installed as its own OS service, so the
//! collector and the alerter restart independently.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use service_manager::{
    RestartPolicy, ServiceInstallCtx, ServiceLabel, ServiceLevel, ServiceManager, ServiceStartCtx,
    ServiceStopCtx, ServiceUninstallCtx,
};
use thiserror::Error;

/// Prefix of every service label.
const LABEL_PREFIX: &str = "org.airqmon";

/// Errors that can occur during service management.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No service manager available on this platform")]
    NoServiceManager,

    #[error("Service manager error: {0}")]
    Manager(String),

    #[error("Could not find airqmon-service executable")]
    ExecutableNotFound,

    #[error("User-level services not supported on this platform")]
    UserLevelNotSupported,

    #[error("Invalid service label '{0}'")]
    InvalidLabel(String),
}

/// Service management level
#[derive(Debug, Clone, Copy, Default)]
pub enum Level {
    /// System-level service (requires root/admin)
    #[default]
    System,
    /// User-level service (no elevated privileges needed)
    User,
}

/// Which role the installed service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Every loop plus the HTTP API in one process.
    Run,
    /// HTTP API only.
    Serve,
    /// Sensor sampling and retention pruning.
    Collect,
    /// Alert polling.
    Alert,
}

impl Role {
    /// Subcommand the service is started with.
    pub fn subcommand(self) -> &'static str {
        match self {
            Role::Run => "run",
            Role::Serve => "serve",
            Role::Collect => "collect",
            Role::Alert => "alert",
        }
    }

    fn label(self) -> Result<ServiceLabel, ServiceError> {
        let raw = format!("{}.{}", LABEL_PREFIX, self.subcommand());
        raw.parse().map_err(|_| ServiceError::InvalidLabel(raw))
    }
}

/// Get the native service manager for this platform.
fn get_manager(level: Level) -> Result<Box<dyn ServiceManager>, ServiceError> {
    let mut manager = <dyn ServiceManager>::native().map_err(|_| ServiceError::NoServiceManager)?;

    let service_level = match level {
        Level::System => ServiceLevel::System,
        Level::User => ServiceLevel::User,
    };

    manager
        .set_level(service_level)
        .map_err(|_| ServiceError::UserLevelNotSupported)?;

    Ok(manager)
}

fn get_executable_path() -> Result<PathBuf, ServiceError> {
    env::current_exe().map_err(|_| ServiceError::ExecutableNotFound)
}

/// Install `role` as a service that starts at boot and restarts on failure.
pub fn install(role: Role, level: Level) -> Result<(), ServiceError> {
    let manager = get_manager(level)?;
    let program = get_executable_path()?;

    manager
        .install(ServiceInstallCtx {
            label: role.label()?,
            program,
            args: vec![OsString::from(role.subcommand())],
            contents: None,
            username: None,
            working_directory: None,
            environment: None,
            autostart: true,
            restart_policy: RestartPolicy::OnFailure {
                delay_secs: Some(5),
            },
        })
        .map_err(|e| ServiceError::Manager(e.to_string()))
}

/// Uninstall the service for `role`.
pub fn uninstall(role: Role, level: Level) -> Result<(), ServiceError> {
    get_manager(level)?
        .uninstall(ServiceUninstallCtx {
            label: role.label()?,
        })
        .map_err(|e| ServiceError::Manager(e.to_string()))
}

/// Start the service for `role`.
pub fn start(role: Role, level: Level) -> Result<(), ServiceError> {
    get_manager(level)?
        .start(ServiceStartCtx {
            label: role.label()?,
        })
        .map_err(|e| ServiceError::Manager(e.to_string()))
}

/// Stop the service for `role`.
pub fn stop(role: Role, level: Level) -> Result<(), ServiceError> {
    get_manager(level)?
        .stop(ServiceStopCtx {
            label: role.label()?,
        })
        .map_err(|e| ServiceError::Manager(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_per_role() {
        for role in [Role::Run, Role::Serve, Role::Collect, Role::Alert] {
            let label = role.label().unwrap();
            assert_eq!(
                label.to_qualified_name(),
                format!("org.airqmon.{}", role.subcommand())
            );
        }
    }
}
