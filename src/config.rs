use crate::secret_string::SecretString;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub webserver: Webserver,
    pub runtime: Runtime,
    pub access: Access,
    pub registries: Vec<Registry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Webserver {
    pub port: u16,
}

impl Default for Webserver {
    fn default() -> Self {
        Webserver { port: 8080 }
    }
}

/// How the host's containerd is reached. With `host_root` set the pull runs
/// through `chroot` into the host filesystem; unset means the binary is
/// executed directly (agent running on the host itself).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Runtime {
    pub host_root: Option<PathBuf>,
    pub binary_paths: Vec<PathBuf>,
    pub namespace: Option<String>,
    pub pull_timeout_seconds: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime {
            host_root: Some(PathBuf::from("/host")),
            // Conventional location first, then the NixOS system profile
            binary_paths: vec![
                PathBuf::from("/usr/bin/ctr"),
                PathBuf::from("/nix/var/nix/profiles/system/sw/bin/ctr"),
            ],
            // kubelet reads images from the k8s.io namespace
            namespace: Some("k8s.io".to_string()),
            pull_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Access {
    pub allowed_network: Option<String>,
    pub allowed_images: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registry {
    pub hostname: String,
    pub username: Option<String>,
    pub token: SecretString,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error if any env var is missing or regex fails.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| panic!("Missing environment variable: {}", var_name))
    });

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_expand_env_vars_success() {
        unsafe {
            env::set_var("PREWARM_TEST_VAR", "value123");
        }
        let input = "This is a test: ${PREWARM_TEST_VAR}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "This is a test: value123");
        unsafe {
            env::remove_var("PREWARM_TEST_VAR");
        }
    }

    #[test]
    #[should_panic(expected = "Missing environment variable: PREWARM_MISSING_VAR")]
    fn test_expand_env_vars_missing_var() {
        let input = "This will fail: ${PREWARM_MISSING_VAR}";
        let _ = expand_env_vars(input).unwrap();
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "No variables here";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_load_config_file() {
        unsafe {
            env::set_var("PREWARM_REGISTRY_TOKEN", "secret_token");
        }
        let yaml_content = r#"
        webserver:
          port: 9090
        runtime:
          hostRoot: /host
          binaryPaths:
            - /usr/bin/ctr
          namespace: k8s.io
          pullTimeoutSeconds: 60
        access:
          allowedNetwork: 10.0.0.0/8
          allowedImages:
            - "registry.example.com/**"
        registries:
          - hostname: registry.example.com
            username: ci
            token: ${PREWARM_REGISTRY_TOKEN}
        "#;

        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let path = tmp_file.path();
        fs::write(path, yaml_content).expect("Failed to write to temp file");

        let config = load_config(path).expect("Should load config");

        assert_eq!(config.webserver.port, 9090);
        assert_eq!(config.runtime.host_root, Some(PathBuf::from("/host")));
        assert_eq!(config.runtime.binary_paths, vec![PathBuf::from("/usr/bin/ctr")]);
        assert_eq!(config.runtime.namespace.as_deref(), Some("k8s.io"));
        assert_eq!(config.runtime.pull_timeout_seconds, 60);
        assert_eq!(config.access.allowed_network.as_deref(), Some("10.0.0.0/8"));
        assert_eq!(config.access.allowed_images, vec!["registry.example.com/**"]);
        assert_eq!(config.registries.len(), 1);
        assert_eq!(config.registries[0].username.as_deref(), Some("ci"));
        assert_eq!(config.registries[0].token.expose_secret(), "secret_token");
        unsafe {
            env::remove_var("PREWARM_REGISTRY_TOKEN");
        }
    }

    #[test]
    fn test_load_config_defaults() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let path = tmp_file.path();
        fs::write(path, "{}").expect("Failed to write to temp file");

        let config = load_config(path).expect("Should load config");

        assert_eq!(config.webserver.port, 8080);
        assert_eq!(config.runtime.host_root, Some(PathBuf::from("/host")));
        assert_eq!(config.runtime.binary_paths.len(), 2);
        assert_eq!(config.runtime.namespace.as_deref(), Some("k8s.io"));
        assert_eq!(config.runtime.pull_timeout_seconds, 300);
        assert_eq!(config.access.allowed_network, None);
        assert!(config.access.allowed_images.is_empty());
        assert!(config.registries.is_empty());
    }
}
