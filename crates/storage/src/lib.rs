use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use uuid::Uuid;

use shared::{
    domain::{CameraId, CameraStatus, ConnectedNetwork, TicketId, TicketStatus},
    protocol::{Camera, CameraPatch, CameraProfile, Ticket},
};

const CAMERA_COLUMNS: &str = "id, location, private_govt, owner_name, contact_no, latitude, \
     longitude, coverage, backup, connected_network, status";
const TICKET_COLUMNS: &str =
    "id, camera_id, location, description, status, reported_by, reported_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Ticket fields supplied by whoever opens it; id and timestamp are assigned
/// on insert.
#[derive(Debug, Clone, Default)]
pub struct NewTicket {
    pub camera_id: Option<CameraId>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub reported_by: Option<String>,
}

/// Result of a ticket status write.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub ticket: Ticket,
    /// Set when a rejection removed the ticket's camera in the same transaction.
    pub removed_camera: Option<CameraId>,
}

/// Inclusive latitude/longitude window used to prefilter radius searches.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn insert_camera(&self, profile: &CameraProfile) -> Result<Camera> {
        let mut tx = self.pool.begin().await?;
        let camera = insert_camera_tx(&mut tx, profile).await?;
        tx.commit().await?;
        Ok(camera)
    }

    pub async fn camera(&self, camera_id: &CameraId) -> Result<Option<Camera>> {
        let row = sqlx::query(&format!("SELECT {CAMERA_COLUMNS} FROM cameras WHERE id = ?"))
            .bind(camera_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(camera_from_row).transpose()
    }

    pub async fn update_camera(
        &self,
        camera_id: &CameraId,
        patch: CameraPatch,
    ) -> Result<Option<Camera>> {
        let Some(mut camera) = self.camera(camera_id).await? else {
            return Ok(None);
        };
        patch.apply(&mut camera.profile);
        let profile = &camera.profile;

        sqlx::query(
            "UPDATE cameras
             SET location = ?, private_govt = ?, owner_name = ?, contact_no = ?,
                 latitude = ?, longitude = ?, coverage = ?, backup = ?,
                 connected_network = ?, status = ?
             WHERE id = ?",
        )
        .bind(&profile.location)
        .bind(&profile.private_govt)
        .bind(&profile.owner_name)
        .bind(&profile.contact_no)
        .bind(profile.latitude)
        .bind(profile.longitude)
        .bind(&profile.coverage)
        .bind(&profile.backup)
        .bind(profile.connected_network.as_ref().map(|v| v.as_str()))
        .bind(profile.status.as_str())
        .bind(camera_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(Some(camera))
    }

    pub async fn delete_camera(&self, camera_id: &CameraId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cameras WHERE id = ?")
            .bind(camera_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn cameras_within(&self, bounds: BoundingBox) -> Result<Vec<Camera>> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMERA_COLUMNS} FROM cameras
             WHERE latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?"
        ))
        .bind(bounds.min_latitude)
        .bind(bounds.max_latitude)
        .bind(bounds.min_longitude)
        .bind(bounds.max_longitude)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(camera_from_row).collect()
    }

    pub async fn insert_ticket(&self, ticket: NewTicket) -> Result<Ticket> {
        let mut tx = self.pool.begin().await?;
        let ticket = insert_ticket_tx(&mut tx, ticket).await?;
        tx.commit().await?;
        Ok(ticket)
    }

    /// Registers a camera and opens a ticket for it atomically.
    pub async fn insert_camera_with_ticket(
        &self,
        profile: &CameraProfile,
        ticket: NewTicket,
    ) -> Result<(Camera, Ticket)> {
        let mut tx = self.pool.begin().await?;
        let camera = insert_camera_tx(&mut tx, profile).await?;
        let ticket = insert_ticket_tx(
            &mut tx,
            NewTicket {
                camera_id: Some(camera.id.clone()),
                ..ticket
            },
        )
        .await?;
        tx.commit().await?;
        Ok((camera, ticket))
    }

    pub async fn ticket(&self, ticket_id: &TicketId) -> Result<Option<Ticket>> {
        let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?"))
            .bind(ticket_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ticket_from_row).transpose()
    }

    pub async fn list_tickets(&self) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets ORDER BY reported_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ticket_from_row).collect()
    }

    /// Writes a ticket's status. Rejecting a ticket also deletes the camera it
    /// refers to; both happen in one transaction.
    pub async fn set_ticket_status(
        &self,
        ticket_id: &TicketId,
        status: TicketStatus,
    ) -> Result<Option<StatusChange>> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE tickets SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(ticket_id.as_str())
            .execute(&mut *tx)
            .await
            .context("failed to update ticket status")?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?"))
            .bind(ticket_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let ticket = ticket_from_row(&row)?;

        let mut removed_camera = None;
        if status == TicketStatus::Rejected {
            if let Some(camera_id) = &ticket.camera_id {
                let deleted = sqlx::query("DELETE FROM cameras WHERE id = ?")
                    .bind(camera_id.as_str())
                    .execute(&mut *tx)
                    .await
                    .context("failed to delete rejected camera")?;
                if deleted.rows_affected() > 0 {
                    removed_camera = Some(camera_id.clone());
                }
            }
        }

        tx.commit().await?;
        Ok(Some(StatusChange {
            ticket,
            removed_camera,
        }))
    }
}

async fn insert_camera_tx(
    tx: &mut Transaction<'_, Sqlite>,
    profile: &CameraProfile,
) -> Result<Camera> {
    let camera_id = CameraId::new(new_record_id());
    sqlx::query(&format!(
        "INSERT INTO cameras ({CAMERA_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(camera_id.as_str())
    .bind(&profile.location)
    .bind(&profile.private_govt)
    .bind(&profile.owner_name)
    .bind(&profile.contact_no)
    .bind(profile.latitude)
    .bind(profile.longitude)
    .bind(&profile.coverage)
    .bind(&profile.backup)
    .bind(profile.connected_network.as_ref().map(|v| v.as_str()))
    .bind(profile.status.as_str())
    .execute(&mut **tx)
    .await
    .context("failed to insert camera")?;

    Ok(Camera {
        id: camera_id,
        profile: profile.clone(),
    })
}

async fn insert_ticket_tx(tx: &mut Transaction<'_, Sqlite>, ticket: NewTicket) -> Result<Ticket> {
    let ticket_id = TicketId::new(new_record_id());
    let reported_at = Utc::now();
    sqlx::query(&format!(
        "INSERT INTO tickets ({TICKET_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(ticket_id.as_str())
    .bind(ticket.camera_id.as_ref().map(|id| id.as_str()))
    .bind(&ticket.location)
    .bind(&ticket.description)
    .bind(TicketStatus::Pending.as_str())
    .bind(&ticket.reported_by)
    .bind(reported_at)
    .execute(&mut **tx)
    .await
    .context("failed to insert ticket")?;

    Ok(Ticket {
        id: ticket_id,
        camera_id: ticket.camera_id,
        location: ticket.location,
        description: ticket.description,
        status: TicketStatus::Pending,
        reported_by: ticket.reported_by,
        reported_at: Some(reported_at),
    })
}

fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn camera_from_row(row: &SqliteRow) -> Result<Camera> {
    Ok(Camera {
        id: CameraId::new(row.try_get::<String, _>("id")?),
        profile: CameraProfile {
            location: row.try_get("location")?,
            private_govt: row.try_get("private_govt")?,
            owner_name: row.try_get("owner_name")?,
            contact_no: row.try_get("contact_no")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            coverage: row.try_get("coverage")?,
            backup: row.try_get("backup")?,
            connected_network: row
                .try_get::<Option<String>, _>("connected_network")?
                .map(ConnectedNetwork::from),
            status: CameraStatus::from(row.try_get::<String, _>("status")?),
        },
    })
}

fn ticket_from_row(row: &SqliteRow) -> Result<Ticket> {
    let status_raw: String = row.try_get("status")?;
    let status = TicketStatus::from_str(&status_raw).map_err(|e| anyhow!(e))?;
    Ok(Ticket {
        id: TicketId::new(row.try_get::<String, _>("id")?),
        camera_id: row
            .try_get::<Option<String>, _>("camera_id")?
            .map(CameraId::new),
        location: row.try_get("location")?,
        description: row.try_get("description")?,
        status,
        reported_by: row.try_get("reported_by")?,
        reported_at: row.try_get::<Option<DateTime<Utc>>, _>("reported_at")?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
