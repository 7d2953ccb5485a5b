//! Project-type detection
//!
//! Maps filesystem markers to a default quality-check command set, used when
//! `quality_gates.checks` is not configured explicitly.

use phalanx_core::config::QualityCheck;
use std::path::Path;

/// Recognized project kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    /// package.json
    Node,
    /// requirements.txt or setup.py
    Python,
    /// go.mod
    Go,
    /// Cargo.toml
    Rust,
    /// pom.xml
    JavaMaven,
    /// build.gradle / build.gradle.kts
    JavaGradle,
    /// No recognized marker
    Generic,
}

impl ProjectKind {
    /// Human-readable name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "nodejs",
            Self::Python => "python",
            Self::Go => "golang",
            Self::Rust => "rust",
            Self::JavaMaven => "java-maven",
            Self::JavaGradle => "java-gradle",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the project kind from filesystem markers in `root`.
#[must_use]
pub fn detect_project_kind(root: &Path) -> ProjectKind {
    if root.join("package.json").exists() {
        return ProjectKind::Node;
    }
    if root.join("requirements.txt").exists() || root.join("setup.py").exists() {
        return ProjectKind::Python;
    }
    if root.join("go.mod").exists() {
        return ProjectKind::Go;
    }
    if root.join("Cargo.toml").exists() {
        return ProjectKind::Rust;
    }
    if root.join("pom.xml").exists() {
        return ProjectKind::JavaMaven;
    }
    if root.join("build.gradle").exists() || root.join("build.gradle.kts").exists() {
        return ProjectKind::JavaGradle;
    }
    ProjectKind::Generic
}

/// Default quality checks for a project kind.
#[must_use]
pub fn default_checks(kind: ProjectKind) -> Vec<QualityCheck> {
    match kind {
        ProjectKind::Node => vec![
            QualityCheck::new("Tests Pass", "npm test", true),
            QualityCheck::new("Linter Pass", "npm run lint", true),
            QualityCheck::new("Build Success", "npm run build", false),
        ],
        ProjectKind::Python => vec![
            QualityCheck::new("Tests Pass", "pytest", true),
            QualityCheck::new("Linter Pass", "flake8 .", false),
            QualityCheck::new("Type Check", "mypy .", false),
        ],
        ProjectKind::Go => vec![
            QualityCheck::new("Tests Pass", "go test ./...", true),
            QualityCheck::new("Vet Check", "go vet ./...", true),
            QualityCheck::new("Build Success", "go build ./...", false),
        ],
        ProjectKind::Rust => vec![
            QualityCheck::new("Tests Pass", "cargo test", true),
            QualityCheck::new("Clippy Check", "cargo clippy", true),
            QualityCheck::new("Build Success", "cargo build", false),
        ],
        ProjectKind::JavaMaven => vec![
            QualityCheck::new("Tests Pass", "mvn test", true),
            QualityCheck::new("Build Success", "mvn package", false),
        ],
        ProjectKind::JavaGradle => vec![
            QualityCheck::new("Tests Pass", "gradle test", true),
            QualityCheck::new("Build Success", "gradle build", false),
        ],
        ProjectKind::Generic => vec![QualityCheck::new(
            "Tests Pass",
            "echo no-test-command-configured",
            false,
        )],
    }
}

/// The effective check list: configured checks when present, otherwise the
/// defaults for the detected project kind.
#[must_use]
pub fn effective_checks(configured: &[QualityCheck], root: &Path) -> Vec<QualityCheck> {
    if configured.is_empty() {
        let kind = detect_project_kind(root);
        tracing::info!(project_kind = %kind, "using default quality checks");
        default_checks(kind)
    } else {
        configured.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_rust_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        assert_eq!(detect_project_kind(dir.path()), ProjectKind::Rust);
    }

    #[test]
    fn test_detect_node_takes_precedence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        assert_eq!(detect_project_kind(dir.path()), ProjectKind::Node);
    }

    #[test]
    fn test_detect_generic_without_markers() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_project_kind(dir.path()), ProjectKind::Generic);
    }

    #[test]
    fn test_default_checks_mark_tests_required() {
        for kind in [
            ProjectKind::Node,
            ProjectKind::Python,
            ProjectKind::Go,
            ProjectKind::Rust,
            ProjectKind::JavaMaven,
            ProjectKind::JavaGradle,
        ] {
            let checks = default_checks(kind);
            assert!(
                checks.iter().any(|c| c.required),
                "{kind} must have at least one required check"
            );
        }
        // Generic projects have nothing to gate on.
        assert!(default_checks(ProjectKind::Generic).iter().all(|c| !c.required));
    }

    #[test]
    fn test_effective_checks_prefers_configured() {
        let dir = TempDir::new().unwrap();
        let configured = vec![QualityCheck::new("Custom", "make check", true)];
        let effective = effective_checks(&configured, dir.path());
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].name, "Custom");
    }
}
