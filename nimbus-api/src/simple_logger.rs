use nimbus_common::ActionLog;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

/// Simple action logger using query() instead of query!() to avoid DATABASE_URL at build time
pub async fn log_action(
    db: &Pool<Postgres>,
    resource_id: Option<Uuid>,
    action_type: &str,
    status: &str,
    details: serde_json::Value,
    initiated_by: &str,
) -> Result<Uuid, sqlx::Error> {
    let log_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO action_logs
         (id, resource_id, action_type, status, details, initiated_by, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW())",
    )
    .bind(log_id)
    .bind(resource_id)
    .bind(action_type)
    .bind(status)
    .bind(details)
    .bind(initiated_by)
    .execute(db)
    .await?;

    println!("📝 [API] Logged: {} - {} ({})", action_type, status, log_id);
    Ok(log_id)
}

/// Set the final status; `details` replaces the stored details when given.
pub async fn log_action_complete(
    db: &Pool<Postgres>,
    log_id: Uuid,
    status: &str,
    details: Option<serde_json::Value>,
) -> Result<ActionLog, sqlx::Error> {
    let log = sqlx::query_as::<_, ActionLog>(
        "UPDATE action_logs SET status = $2, details = COALESCE($3, details)
         WHERE id = $1
         RETURNING id, resource_id, action_type, status, details, initiated_by, created_at",
    )
    .bind(log_id)
    .bind(status)
    .bind(details)
    .fetch_one(db)
    .await?;

    println!("📝 [API] Completed: {} - {} ({})", log.action_type, status, log_id);
    Ok(log)
}
