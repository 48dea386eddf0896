//! Project rows

use chrono::{DateTime, Utc};

use super::Store;
use crate::errors::HostkitError;

/// Runtime a project is served with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Node,
    Python,
    Static,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Node => "node",
            RuntimeKind::Python => "python",
            RuntimeKind::Static => "static",
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "node" | "nodejs" | "nextjs" => Ok(RuntimeKind::Node),
            "python" | "fastapi" | "flask" | "django" => Ok(RuntimeKind::Python),
            "static" => Ok(RuntimeKind::Static),
            _ => Err(format!("Unknown runtime: {}", s)),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A project row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub runtime: String,
    pub port: i64,
    pub status: String,
    /// Name of the project's own database, when it has one
    pub database_name: Option<String>,
    pub git_repo: Option<String>,
    pub git_branch: Option<String>,
    /// Start command override currently applied to the supervisor
    pub entry_point: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Parsed runtime; unknown values are served as static
    pub fn runtime_kind(&self) -> RuntimeKind {
        self.runtime.parse().unwrap_or(RuntimeKind::Static)
    }
}

/// Fields for a new project row
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub runtime: RuntimeKind,
    pub port: u16,
    pub database_name: Option<String>,
    pub git_repo: Option<String>,
    pub git_branch: Option<String>,
}

impl NewProject {
    pub fn new(name: impl Into<String>, runtime: RuntimeKind, port: u16) -> Self {
        Self {
            name: name.into(),
            runtime,
            port,
            database_name: None,
            git_repo: None,
            git_branch: None,
        }
    }
}

const MAX_PROJECT_NAME_LEN: usize = 63;

/// Project names become directory and unit names, so only `[a-z0-9-]` is allowed
pub fn validate_project_name(name: &str) -> Result<(), HostkitError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_PROJECT_NAME_LEN
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(HostkitError::InvalidProjectName(name.to_string()))
    }
}

const PROJECT_COLUMNS: &str = "id, name, runtime, port, status, database_name, git_repo, \
                               git_branch, entry_point, created_at";

impl Store {
    pub async fn insert_project(&self, project: &NewProject) -> Result<Project, HostkitError> {
        validate_project_name(&project.name)?;

        sqlx::query(
            r#"
            INSERT INTO projects (name, runtime, port, status, database_name, git_repo, git_branch, created_at)
            VALUES (?, ?, ?, 'active', ?, ?, ?, ?)
            "#,
        )
        .bind(&project.name)
        .bind(project.runtime.as_str())
        .bind(project.port as i64)
        .bind(&project.database_name)
        .bind(&project.git_repo)
        .bind(&project.git_branch)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        self.get_project(&project.name)
            .await?
            .ok_or_else(|| HostkitError::NotFound(format!("project {}", project.name)))
    }

    pub async fn get_project(&self, name: &str) -> Result<Option<Project>, HostkitError> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        Ok(project)
    }

    pub async fn set_project_entry_point(
        &self,
        name: &str,
        entry_point: Option<&str>,
    ) -> Result<(), HostkitError> {
        sqlx::query("UPDATE projects SET entry_point = ? WHERE name = ?")
            .bind(entry_point)
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_project_git(
        &self,
        name: &str,
        repo: Option<&str>,
        branch: Option<&str>,
    ) -> Result<(), HostkitError> {
        sqlx::query("UPDATE projects SET git_repo = ?, git_branch = ? WHERE name = ?")
            .bind(repo)
            .bind(branch)
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
