//! Build-definition parsing.

use crate::{ConfigError, ConfigResult};
use dockhand_core::{ContainerConfig, JobConfig};
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::BTreeMap;

/// Name of the build-definition file at the root of a project.
pub const CONFIG_FILE: &str = "dockhand.kdl";

/// Parse a job configuration from KDL text.
pub fn parse_job_config(kdl: &str) -> ConfigResult<JobConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut build = None;
    let mut release = None;
    let mut services = BTreeMap::new();
    let mut link_services = false;

    for node in doc.nodes() {
        match node.name().value() {
            "build" => {
                if build.is_some() {
                    return Err(ConfigError::Duplicate("build".to_string()));
                }
                build = Some(parse_container(node)?);
            }
            "release" => {
                if release.is_some() {
                    return Err(ConfigError::Duplicate("release".to_string()));
                }
                release = Some(parse_container(node)?);
            }
            "service" => {
                insert_service(&mut services, node)?;
            }
            "services" => {
                link_services = get_bool_prop(node, "link")?.unwrap_or(false);
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        if child.name().value() == "service" {
                            insert_service(&mut services, child)?;
                        }
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let build = build.ok_or_else(|| ConfigError::MissingField("build".to_string()))?;
    if build.image.is_empty() {
        return Err(ConfigError::MissingField("build image".to_string()));
    }

    Ok(JobConfig {
        build,
        release,
        services,
        link_services,
    })
}

/// Parse a job configuration from raw file contents.
pub fn parse_job_config_bytes(bytes: &[u8]) -> ConfigResult<JobConfig> {
    parse_job_config(std::str::from_utf8(bytes)?)
}

fn insert_service(
    services: &mut BTreeMap<String, ContainerConfig>,
    node: &KdlNode,
) -> ConfigResult<()> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("service name".to_string()))?;

    let config = parse_container(node)?;
    if config.image.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "image for service '{}'",
            name
        )));
    }

    if services.insert(name.clone(), config).is_some() {
        return Err(ConfigError::Duplicate(format!("service '{}'", name)));
    }
    Ok(())
}

fn parse_container(node: &KdlNode) -> ConfigResult<ContainerConfig> {
    let mut config = ContainerConfig::default();

    let Some(children) = node.children() else {
        return Ok(config);
    };

    for child in children.nodes() {
        match child.name().value() {
            "image" => {
                config.image = get_first_string_arg(child).unwrap_or_default();
            }
            "cmd" => {
                config.cmd = get_all_scalar_args(child);
            }
            "env" => {
                // env FOO="bar" and env { FOO "bar" } are both accepted
                for entry in child.entries() {
                    if let Some(key) = entry.name() {
                        if let Some(val) = scalar_to_string(entry.value()) {
                            config.env.insert(key.value().to_string(), val);
                        }
                    }
                }
                if let Some(grandchildren) = child.children() {
                    for gc in grandchildren.nodes() {
                        let key = gc.name().value().to_string();
                        let val = get_all_scalar_args(gc).into_iter().next().unwrap_or_default();
                        config.env.insert(key, val);
                    }
                }
            }
            "ports" | "port" => {
                config.ports.extend(get_all_scalar_args(child));
            }
            "privileged" => {
                config.privileged = match child.entries().iter().find(|e| e.name().is_none()) {
                    None => true,
                    Some(entry) => entry.value().as_bool().ok_or_else(|| {
                        ConfigError::InvalidValue {
                            field: "privileged".to_string(),
                            message: format!("expected a boolean, got {}", entry.value()),
                        }
                    })?,
                };
            }
            "workdir" => {
                config.workdir = get_first_string_arg(child);
            }
            _ => {}
        }
    }

    Ok(config)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_scalar_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| scalar_to_string(e.value()))
        .collect()
}

fn scalar_to_string(value: &KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        return Some(s.to_string());
    }
    if let Some(i) = value.as_integer() {
        return Some(i.to_string());
    }
    value.as_bool().map(|b| b.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<bool>> {
    match node.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: name.to_string(),
                message: format!("expected a boolean, got {}", value),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_only() {
        let kdl = r#"
            build {
                image "x"
            }
        "#;

        let config = parse_job_config(kdl).unwrap();
        assert_eq!(config.build.image, "x");
        assert!(config.release.is_none());
        assert!(config.release_stage().is_none());
        assert!(config.services.is_empty());
        assert!(!config.link_services);
    }

    #[test]
    fn test_parse_full_definition() {
        let kdl = r#"
            build {
                image "rust:1.85"
                cmd "cargo" "test" "--workspace"
                env {
                    RUST_LOG "debug"
                    CI "true"
                }
                ports "8080/tcp" 9090
                privileged #true
                workdir "crates/app"
            }

            release {
                image "alpine"
                cmd "sh" "-c" "./release.sh"
                env TARGET="prod"
            }

            services link=#true {
                service "db" {
                    image "postgres:16"
                    env { POSTGRES_PASSWORD "secret" }
                }
                service "cache" {
                    image "redis:7"
                }
            }
        "#;

        let config = parse_job_config(kdl).unwrap();
        assert_eq!(config.build.image, "rust:1.85");
        assert_eq!(config.build.cmd, vec!["cargo", "test", "--workspace"]);
        assert_eq!(config.build.env.get("RUST_LOG").unwrap(), "debug");
        assert_eq!(config.build.env.get("CI").unwrap(), "true");
        assert_eq!(config.build.ports, vec!["8080/tcp", "9090"]);
        assert!(config.build.privileged);
        assert_eq!(config.build.workdir.as_deref(), Some("crates/app"));

        let release = config.release_stage().unwrap();
        assert_eq!(release.image, "alpine");
        assert_eq!(release.env.get("TARGET").unwrap(), "prod");

        assert!(config.link_services);
        assert_eq!(
            config.services.keys().collect::<Vec<_>>(),
            vec!["cache", "db"]
        );
        assert_eq!(config.services["db"].image, "postgres:16");
        assert_eq!(
            config.services["db"].env.get("POSTGRES_PASSWORD").unwrap(),
            "secret"
        );
    }

    #[test]
    fn test_top_level_service_nodes() {
        let kdl = r#"
            build { image "x"; }
            service "db" { image "postgres:16"; }
        "#;

        let config = parse_job_config(kdl).unwrap();
        assert_eq!(config.services.len(), 1);
        assert!(!config.link_services);
    }

    #[test]
    fn test_empty_build_image_is_error() {
        let kdl = r#"
            build {
                cmd "make"
            }
        "#;

        let result = parse_job_config(kdl);
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_missing_build_is_error() {
        let result = parse_job_config(r#"release { image "y"; }"#);
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_empty_release_image_is_skipped() {
        let kdl = r#"
            build { image "x"; }
            release { cmd "true"; }
        "#;

        let config = parse_job_config(kdl).unwrap();
        assert!(config.release.is_some());
        assert!(config.release_stage().is_none());
    }

    #[test]
    fn test_duplicate_service_is_error() {
        let kdl = r#"
            build { image "x"; }
            service "db" { image "postgres"; }
            service "db" { image "mysql"; }
        "#;

        assert!(matches!(
            parse_job_config(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_invalid_privileged_value() {
        let kdl = r#"
            build {
                image "x"
                privileged "yes"
            }
        "#;

        assert!(matches!(
            parse_job_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_kdl_is_parse_error() {
        assert!(matches!(
            parse_job_config("build {"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_from_bytes() {
        let config = parse_job_config_bytes(b"build { image \"x\"; }").unwrap();
        assert_eq!(config.build.image, "x");

        assert!(matches!(
            parse_job_config_bytes(&[0xff, 0xfe]),
            Err(ConfigError::Encoding(_))
        ));
    }
}
