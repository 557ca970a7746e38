use shared::{
    domain::{CameraId, CameraStatus, TicketId, TicketStatus},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        validate_coordinates, Camera, CameraPatch, CameraProfile, CameraTicketCreated,
        NearbyCamera, NearbyCamerasRequest, OnGroundCameraRequest, OwnershipFilter,
        ReportIssueRequest, StatusFilter, Ticket, ON_GROUND_REPORTER,
    },
};
use storage::{BoundingBox, NewTicket, Storage};
use tracing::{info, warn};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0088;
/// Approximate length of one degree of latitude.
const KM_PER_DEGREE: f64 = 111.1;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn create_camera(ctx: &ApiContext, profile: CameraProfile) -> Result<Camera, ApiError> {
    profile.validate()?;
    let camera = ctx
        .storage
        .insert_camera(&profile)
        .await
        .map_err(internal)?;
    info!(camera_id = %camera.id, "camera registered");
    Ok(camera)
}

pub async fn get_camera(ctx: &ApiContext, camera_id: &CameraId) -> Result<Camera, ApiError> {
    ctx.storage
        .camera(camera_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiException::not_found("camera", camera_id).into())
}

pub async fn update_camera(
    ctx: &ApiContext,
    camera_id: &CameraId,
    patch: CameraPatch,
) -> Result<Camera, ApiError> {
    let current = get_camera(ctx, camera_id).await?;
    validate_coordinates(
        patch.latitude.unwrap_or(current.profile.latitude),
        patch.longitude.unwrap_or(current.profile.longitude),
    )?;
    ctx.storage
        .update_camera(camera_id, patch)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiException::not_found("camera", camera_id).into())
}

pub async fn delete_camera(ctx: &ApiContext, camera_id: &CameraId) -> Result<(), ApiError> {
    if !ctx
        .storage
        .delete_camera(camera_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiException::not_found("camera", camera_id).into());
    }
    info!(camera_id = %camera_id, "camera deleted");
    Ok(())
}

pub async fn nearby_cameras(
    ctx: &ApiContext,
    request: &NearbyCamerasRequest,
) -> Result<Vec<NearbyCamera>, ApiError> {
    request.validate()?;
    let radius_km = f64::from(request.radius_meters) / 1000.0;
    let candidates = ctx
        .storage
        .cameras_within(search_window(request.latitude, request.longitude, radius_km))
        .await
        .map_err(internal)?;

    let mut nearby: Vec<NearbyCamera> = candidates
        .into_iter()
        .filter(|camera| {
            validate_coordinates(camera.profile.latitude, camera.profile.longitude).is_ok()
        })
        .filter(|camera| matches_status(camera, request.status_filter.unwrap_or_default()))
        .filter(|camera| matches_ownership(camera, request.ownership_filter.unwrap_or_default()))
        .filter_map(|camera| {
            let distance = great_circle_km(
                (request.latitude, request.longitude),
                (camera.profile.latitude, camera.profile.longitude),
            );
            (distance <= radius_km).then(|| NearbyCamera {
                camera_id: camera.id.clone(),
                camera,
                distance,
            })
        })
        .collect();

    nearby.sort_by(|a, b| {
        a.distance.total_cmp(&b.distance).then_with(|| {
            let a_down = a.camera.profile.status != CameraStatus::Working;
            let b_down = b.camera.profile.status != CameraStatus::Working;
            a_down.cmp(&b_down)
        })
    });
    Ok(nearby)
}

pub async fn report_issue(ctx: &ApiContext, report: ReportIssueRequest) -> Result<Ticket, ApiError> {
    let ticket = ctx
        .storage
        .insert_ticket(NewTicket {
            camera_id: report.camera_id,
            location: report.location,
            description: report.description,
            reported_by: report.reported_by,
        })
        .await
        .map_err(internal)?;
    info!(ticket_id = %ticket.id, "ticket reported");
    Ok(ticket)
}

pub async fn create_camera_with_ticket(
    ctx: &ApiContext,
    request: OnGroundCameraRequest,
) -> Result<CameraTicketCreated, ApiError> {
    request.profile.validate()?;
    let (camera, ticket) = ctx
        .storage
        .insert_camera_with_ticket(
            &request.profile,
            NewTicket {
                camera_id: None,
                location: request.profile.location.clone(),
                description: Some(request.description),
                reported_by: Some(ON_GROUND_REPORTER.to_string()),
            },
        )
        .await
        .map_err(internal)?;
    info!(camera_id = %camera.id, ticket_id = %ticket.id, "on-ground camera registered");
    Ok(CameraTicketCreated { camera, ticket })
}

/// Lists every ticket. An empty registry answers `NotFound`, which clients
/// treat as an empty list.
pub async fn list_tickets(ctx: &ApiContext) -> Result<Vec<Ticket>, ApiError> {
    let tickets = ctx.storage.list_tickets().await.map_err(internal)?;
    if tickets.is_empty() {
        return Err(ApiError::new(ErrorCode::NotFound, "No valid tickets found"));
    }
    Ok(tickets)
}

/// Applies a status to a ticket. Rejecting a ticket also removes the camera
/// it refers to from the registry.
pub async fn update_ticket_status(
    ctx: &ApiContext,
    ticket_id: &TicketId,
    status: TicketStatus,
) -> Result<Ticket, ApiError> {
    let change = ctx
        .storage
        .set_ticket_status(ticket_id, status)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::from(ApiException::not_found("ticket", ticket_id)))?;
    info!(ticket_id = %ticket_id, %status, "ticket status updated");
    if let Some(camera_id) = &change.removed_camera {
        warn!(ticket_id = %ticket_id, camera_id = %camera_id, "camera removed after rejection");
    }

    Ok(change.ticket)
}

pub async fn close_ticket(ctx: &ApiContext, ticket_id: &TicketId) -> Result<Ticket, ApiError> {
    let ticket = ctx
        .storage
        .ticket(ticket_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::from(ApiException::not_found("ticket", ticket_id)))?;
    if !ticket.status.is_decided() {
        return Err(ApiException::validation(
            "Pending tickets cannot be closed until a decision is made",
        )
        .into());
    }
    update_ticket_status(ctx, ticket_id, TicketStatus::Closed).await
}

fn matches_status(camera: &Camera, filter: StatusFilter) -> bool {
    match filter {
        StatusFilter::Any => true,
        StatusFilter::Working => camera.profile.status.reports_working(),
        StatusFilter::NotWorking => !camera.profile.status.reports_working(),
    }
}

fn matches_ownership(camera: &Camera, filter: OwnershipFilter) -> bool {
    let government = camera
        .profile
        .private_govt
        .as_deref()
        .map(|raw| {
            let lower = raw.to_ascii_lowercase();
            lower.contains("govt") || lower.contains("government")
        })
        .unwrap_or(false);
    match filter {
        OwnershipFilter::Any => true,
        OwnershipFilter::Government => government,
        OwnershipFilter::Private => !government,
    }
}

fn search_window(latitude: f64, longitude: f64, radius_km: f64) -> BoundingBox {
    let lat_diff = radius_km / KM_PER_DEGREE;
    let cos_lat = latitude.to_radians().cos();
    let lon_diff = if cos_lat.abs() < 1e-9 {
        180.0
    } else {
        radius_km / (KM_PER_DEGREE * cos_lat.abs())
    };
    BoundingBox {
        min_latitude: (latitude - lat_diff).max(-90.0),
        max_latitude: (latitude + lat_diff).min(90.0),
        min_longitude: (longitude - lon_diff).max(-180.0),
        max_longitude: (longitude + lon_diff).min(180.0),
    }
}

/// Haversine distance between two `(latitude, longitude)` points.
pub fn great_circle_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
