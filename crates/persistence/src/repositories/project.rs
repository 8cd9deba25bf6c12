//! Project repository for database operations.

use domain::models::{Project, ProjectMeta, ProjectType};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::ProjectEntity;
use crate::metrics::QueryTimer;

/// Repository for project database operations.
#[derive(Clone)]
pub struct ProjectRepository {
    pool: PgPool,
}

impl ProjectRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new project.
    pub async fn create(
        &self,
        name: &str,
        project_type: ProjectType,
        meta: &ProjectMeta,
        request_template: &JsonValue,
        response_template: &JsonValue,
        owner: &str,
    ) -> Result<Project, sqlx::Error> {
        let meta_json = serde_json::to_value(meta).map_err(decode_err)?;

        let timer = QueryTimer::new("create_project");
        let result = sqlx::query_as::<_, ProjectEntity>(
            r#"
            INSERT INTO projects (name, project_type, meta, request_template, response_template, owner)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, project_type, meta, request_template, response_template,
                      owner, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(project_type.as_str())
        .bind(&meta_json)
        .bind(request_template)
        .bind(response_template)
        .bind(owner)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        entity_to_domain(result?)
    }

    /// Find a project by ID.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Project>, sqlx::Error> {
        let timer = QueryTimer::new("find_project_by_id");
        let result = sqlx::query_as::<_, ProjectEntity>(
            r#"
            SELECT id, name, project_type, meta, request_template, response_template,
                   owner, created_at, updated_at
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        result?.map(entity_to_domain).transpose()
    }

    /// List projects for an owner, newest first.
    pub async fn list_for_owner(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Project>, sqlx::Error> {
        let timer = QueryTimer::new("list_projects_for_owner");
        let result = sqlx::query_as::<_, ProjectEntity>(
            r#"
            SELECT id, name, project_type, meta, request_template, response_template,
                   owner, created_at, updated_at
            FROM projects
            WHERE owner = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        result?.into_iter().map(entity_to_domain).collect()
    }

    /// Replace the request and response templates for a project.
    pub async fn update_templates(
        &self,
        id: Uuid,
        request_template: &JsonValue,
        response_template: &JsonValue,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("update_project_templates");
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET request_template = $2, response_template = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(request_template)
        .bind(response_template)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result?.rows_affected() > 0)
    }
}

fn decode_err(e: serde_json::Error) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn entity_to_domain(entity: ProjectEntity) -> Result<Project, sqlx::Error> {
    let project_type = entity
        .project_type
        .parse::<ProjectType>()
        .unwrap_or(ProjectType::Rest);
    let meta: ProjectMeta = serde_json::from_value(entity.meta).map_err(decode_err)?;

    Ok(Project {
        id: entity.id,
        name: entity.name,
        project_type,
        meta,
        request_template: entity.request_template,
        response_template: entity.response_template,
        owner: entity.owner,
        created_at: entity.created_at,
        updated_at: entity.updated_at,
    })
}
