//! Resource attributes identifying the process that produces telemetry.

use std::{env, fs};

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource as semconv;
use tracing::warn;

use crate::config::Config;

/// Build the resource for `config`.
///
/// `service.name` is always set, even when empty. `service.version` comes from
/// `version`, falling back to `config.service_version`. OS, host and process
/// attributes are added on top; one that cannot be detected is left out with a
/// warning, and the rest of the resource is kept.
pub fn build_resource(config: &Config, version: &str) -> Resource {
    resource_for_host(config, version, host_name())
}

fn resource_for_host(config: &Config, version: &str, host: Option<String>) -> Resource {
    let mut attrs = vec![
        KeyValue::new(semconv::OS_TYPE, env::consts::OS),
        KeyValue::new(semconv::HOST_ARCH, env::consts::ARCH),
        KeyValue::new(semconv::PROCESS_PID, i64::from(std::process::id())),
        KeyValue::new(semconv::PROCESS_RUNTIME_NAME, "rust"),
    ];

    let version = if version.is_empty() {
        config.service_version.as_str()
    } else {
        version
    };
    if !version.is_empty() {
        attrs.push(KeyValue::new(semconv::SERVICE_VERSION, version.to_owned()));
    }
    if !config.environment.is_empty() {
        attrs.push(KeyValue::new(
            semconv::DEPLOYMENT_ENVIRONMENT_NAME,
            config.environment.clone(),
        ));
    }
    if let Some(exe) = executable_name() {
        attrs.push(KeyValue::new(semconv::PROCESS_EXECUTABLE_NAME, exe));
    }
    match host {
        Some(host) => attrs.push(KeyValue::new(semconv::HOST_NAME, host)),
        None => warn!("host name not detectable; omitting {}", semconv::HOST_NAME),
    }

    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes(attrs)
        .build()
}

fn executable_name() -> Option<String> {
    let exe = env::current_exe().ok()?;
    exe.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn host_name() -> Option<String> {
    let from_env = ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .filter_map(|var| env::var(var).ok());
    let from_files = ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .into_iter()
        .filter_map(|path| fs::read_to_string(path).ok());
    from_env
        .chain(from_files)
        .map(|name| name.trim().to_owned())
        .find(|name| !name.is_empty())
}
