//! Build type detection

use std::path::Path;

use serde_json::Value;

/// Start command of a standalone Next.js bundle, relative to the app root
pub const STANDALONE_ENTRY_POINT: &str = "node .next/standalone/server.js";

/// Packaging shape of a source tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    /// Runs as-is after a dependency install
    Standard,
    /// Framework app that needs a build step
    FrameworkBuild,
    /// Framework output carrying its own dependency tree
    FrameworkStandaloneBundle,
    /// Plain files served directly
    Static,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Standard => "standard",
            BuildType::FrameworkBuild => "framework",
            BuildType::FrameworkStandaloneBundle => "standalone",
            BuildType::Static => "static",
        }
    }

    /// Start command this build type requires, if it differs from the default
    pub fn entry_point(&self) -> Option<&'static str> {
        match self {
            BuildType::FrameworkStandaloneBundle => Some(STANDALONE_ENTRY_POINT),
            _ => None,
        }
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of inspecting a source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub build_type: BuildType,
    /// Structural problem found; fatal for a standalone bundle
    pub warning: Option<String>,
}

const FRAMEWORK_CONFIGS: &[&str] = &[
    "next.config.js",
    "next.config.mjs",
    "next.config.cjs",
    "next.config.ts",
];

const APP_MANIFESTS: &[&str] = &[
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "main.py",
    "app.py",
];

/// Classify the tree at `source`. Pure inspection.
pub fn detect(source: &Path) -> Detection {
    let standalone = source.join(".next").join("standalone");
    if standalone.is_dir() {
        let warning = (!standalone.join("node_modules").is_dir()).then(|| {
            ".next/standalone has no node_modules; the bundle would fail at runtime \
             with missing modules"
                .to_string()
        });
        return Detection {
            build_type: BuildType::FrameworkStandaloneBundle,
            warning,
        };
    }

    if FRAMEWORK_CONFIGS.iter().any(|f| source.join(f).is_file()) || depends_on_next(source) {
        return Detection {
            build_type: BuildType::FrameworkBuild,
            warning: None,
        };
    }

    let has_manifest = APP_MANIFESTS.iter().any(|f| source.join(f).is_file());
    if !has_manifest && source.join("index.html").is_file() {
        return Detection {
            build_type: BuildType::Static,
            warning: None,
        };
    }

    Detection {
        build_type: BuildType::Standard,
        warning: None,
    }
}

fn depends_on_next(source: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(source.join("package.json")) else {
        return false;
    };
    let Ok(manifest) = serde_json::from_str::<Value>(&contents) else {
        return false;
    };
    ["dependencies", "devDependencies"]
        .iter()
        .any(|section| manifest.get(section).and_then(|d| d.get("next")).is_some())
}

/// Whether `package.json` under `source` defines a `build` script
pub fn has_build_script(source: &Path) -> bool {
    std::fs::read_to_string(source.join("package.json"))
        .ok()
        .and_then(|c| serde_json::from_str::<Value>(&c).ok())
        .is_some_and(|m| m.pointer("/scripts/build").is_some())
}
