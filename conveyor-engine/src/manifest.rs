//! Kubernetes manifests
//!
//! Templates are generated at build time with placeholder tokens and
//! rendered per deployment target:
//!
//! - `IMAGE_PLACEHOLDER` becomes the image reference of the build
//! - `NAMESPACE_PLACEHOLDER` becomes the target namespace
//!
//! Rendering fails if no template carries the image placeholder or if any
//! `*_PLACEHOLDER` token survives substitution.

use conveyor_core::BuildConfig;
use conveyor_core::domain::context::BuildContext;
use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

pub const IMAGE_PLACEHOLDER: &str = "IMAGE_PLACEHOLDER";
pub const NAMESPACE_PLACEHOLDER: &str = "NAMESPACE_PLACEHOLDER";

static PLACEHOLDER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Z0-9_]*_PLACEHOLDER\b").expect("placeholder pattern is valid")
});

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No manifest templates found in {}", .0.display())]
    NoTemplates(PathBuf),

    #[error("No template contains {IMAGE_PLACEHOLDER}")]
    MissingImagePlaceholder,

    #[error("Unresolved placeholder {token} in {file}")]
    Unresolved { file: String, token: String },

    #[error("Failed to serialize manifest {file}: {message}")]
    Serialize { file: String, message: String },

    #[error("Manifest I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A template or rendered manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// File name (e.g., "deployment.yaml")
    pub file: String,
    pub content: String,
}

// =============================================================================
// Generation
// =============================================================================

/// Builds the deployment and service templates for the application
pub fn generate_templates(
    config: &BuildConfig,
    build: &BuildContext,
) -> Result<Vec<Manifest>, RenderError> {
    let app = build.app_name();
    let version = build.revision();
    let managed_by = format!("ci-{}", build.platform());

    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": config.deployment_name(),
            "namespace": NAMESPACE_PLACEHOLDER,
            "labels": { "app": app, "version": version, "managed-by": managed_by }
        },
        "spec": {
            "replicas": config.replicas,
            "selector": { "matchLabels": { "app": app } },
            "template": {
                "metadata": {
                    "labels": { "app": app, "version": version },
                    "annotations": {
                        "prometheus.io/scrape": "true",
                        "prometheus.io/port": config.port.to_string()
                    }
                },
                "spec": {
                    "containers": [{
                        "name": app,
                        "image": IMAGE_PLACEHOLDER,
                        "imagePullPolicy": "Always",
                        "ports": [{
                            "name": "http",
                            "containerPort": config.port,
                            "protocol": "TCP"
                        }],
                        "env": [
                            { "name": "ENVIRONMENT", "value": NAMESPACE_PLACEHOLDER },
                            { "name": "VERSION", "value": version }
                        ],
                        "resources": {
                            "requests": { "memory": "256Mi", "cpu": "250m" },
                            "limits": { "memory": "512Mi", "cpu": "500m" }
                        },
                        "livenessProbe": {
                            "httpGet": { "path": "/health", "port": "http" },
                            "initialDelaySeconds": 30,
                            "periodSeconds": 10
                        },
                        "readinessProbe": {
                            "httpGet": { "path": "/ready", "port": "http" },
                            "initialDelaySeconds": 5,
                            "periodSeconds": 5
                        }
                    }]
                }
            }
        }
    });

    let service = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": config.service_name(),
            "namespace": NAMESPACE_PLACEHOLDER,
            "labels": { "app": app }
        },
        "spec": {
            "selector": { "app": app },
            "ports": [{ "name": "http", "protocol": "TCP", "port": 80, "targetPort": "http" }],
            "type": "LoadBalancer"
        }
    });

    [("deployment.yaml", deployment), ("service.yaml", service)]
        .into_iter()
        .map(|(file, value)| {
            serde_yaml::to_string(&value)
                .map(|content| Manifest {
                    file: file.to_string(),
                    content,
                })
                .map_err(|e| RenderError::Serialize {
                    file: file.to_string(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Writes manifests into `dir`, creating it if needed
pub fn write_manifests(dir: &Path, manifests: &[Manifest]) -> Result<Vec<PathBuf>, RenderError> {
    std::fs::create_dir_all(dir).map_err(|source| RenderError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let path = dir.join(&manifest.file);
        std::fs::write(&path, &manifest.content).map_err(|source| RenderError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

// =============================================================================
// Rendering
// =============================================================================

/// Loads every `.yaml`/`.yml` template from `dir` in file name order
pub fn load_templates(dir: &Path) -> Result<Vec<Manifest>, RenderError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RenderError::NoTemplates(dir.to_path_buf()));
        }
        Err(source) => {
            return Err(RenderError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(RenderError::NoTemplates(dir.to_path_buf()));
    }

    paths
        .into_iter()
        .map(|path| {
            let content = std::fs::read_to_string(&path).map_err(|source| RenderError::Io {
                path: path.clone(),
                source,
            })?;
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(Manifest { file, content })
        })
        .collect()
}

/// Substitutes image and namespace into a template set
///
/// # Arguments
/// * `templates` - Templates as loaded by [`load_templates`]
/// * `image` - Image reference for `IMAGE_PLACEHOLDER`
/// * `namespace` - Target namespace for `NAMESPACE_PLACEHOLDER`
pub fn render(
    templates: &[Manifest],
    image: &str,
    namespace: &str,
) -> Result<Vec<Manifest>, RenderError> {
    if templates.is_empty() {
        return Err(RenderError::NoTemplates(PathBuf::new()));
    }
    if !templates.iter().any(|t| t.content.contains(IMAGE_PLACEHOLDER)) {
        return Err(RenderError::MissingImagePlaceholder);
    }

    let rendered: Vec<Manifest> = templates
        .iter()
        .map(|t| Manifest {
            file: t.file.clone(),
            content: t
                .content
                .replace(IMAGE_PLACEHOLDER, image)
                .replace(NAMESPACE_PLACEHOLDER, namespace),
        })
        .collect();

    for manifest in &rendered {
        if let Some(token) = PLACEHOLDER_TOKEN.find(&manifest.content) {
            return Err(RenderError::Unresolved {
                file: manifest.file.clone(),
                token: token.as_str().to_string(),
            });
        }
    }

    info!(
        "Rendered {} manifest(s) for {} with {}",
        rendered.len(),
        namespace,
        image
    );
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{build_config, build_context};

    fn template(file: &str, content: &str) -> Manifest {
        Manifest {
            file: file.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_generated_templates_carry_placeholders() {
        let templates = generate_templates(&build_config(), &build_context("main")).unwrap();
        assert_eq!(templates.len(), 2);

        let deployment: serde_yaml::Value = serde_yaml::from_str(&templates[0].content).unwrap();
        assert_eq!(deployment["kind"], "Deployment");
        assert_eq!(deployment["metadata"]["name"], "myapp-deployment");
        assert_eq!(deployment["spec"]["replicas"], 3);
        let container = &deployment["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], IMAGE_PLACEHOLDER);
        assert_eq!(container["resources"]["limits"]["cpu"], "500m");
        assert_eq!(container["readinessProbe"]["httpGet"]["path"], "/ready");

        let service: serde_yaml::Value = serde_yaml::from_str(&templates[1].content).unwrap();
        assert_eq!(service["spec"]["type"], "LoadBalancer");
        assert_eq!(service["spec"]["ports"][0]["port"], 80);
    }

    #[test]
    fn test_render_generated_templates() {
        let templates = generate_templates(&build_config(), &build_context("main")).unwrap();
        let rendered = render(&templates, "localhost:5000/myapp:abc1234", "staging").unwrap();

        assert!(rendered[0].content.contains("localhost:5000/myapp:abc1234"));
        assert!(rendered[1].content.contains("namespace: staging"));
        assert!(!rendered.iter().any(|m| m.content.contains("PLACEHOLDER")));
    }

    #[test]
    fn test_render_requires_image_placeholder() {
        let templates = vec![template("service.yaml", "kind: Service\n")];
        assert!(matches!(
            render(&templates, "img", "staging"),
            Err(RenderError::MissingImagePlaceholder)
        ));
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        let templates = vec![template(
            "deployment.yaml",
            "image: IMAGE_PLACEHOLDER\nreplicas: REPLICAS_PLACEHOLDER\n",
        )];
        match render(&templates, "img", "staging") {
            Err(RenderError::Unresolved { file, token }) => {
                assert_eq!(file, "deployment.yaml");
                assert_eq!(token, "REPLICAS_PLACEHOLDER");
            }
            other => panic!("expected unresolved placeholder, got {:?}", other),
        }
    }

    #[test]
    fn test_load_templates_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let templates = generate_templates(&build_config(), &build_context("main")).unwrap();
        write_manifests(dir.path(), &templates).unwrap();
        std::fs::write(dir.path().join("build-info.json"), "{}").unwrap();

        let loaded = load_templates(dir.path()).unwrap();
        let files: Vec<_> = loaded.iter().map(|m| m.file.as_str()).collect();
        assert_eq!(files, vec!["deployment.yaml", "service.yaml"]);
    }

    #[test]
    fn test_load_templates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_templates(&dir.path().join("build")),
            Err(RenderError::NoTemplates(_))
        ));
    }
}
