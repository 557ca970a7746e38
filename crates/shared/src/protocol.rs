use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        de_coordinate, de_opt_text, de_opt_timestamp, latitude_in_range, longitude_in_range,
        CameraId, CameraStatus, ConnectedNetwork, TicketId, TicketStatus,
    },
    error::{ApiException, ErrorCode},
};

pub const DEFAULT_NEARBY_RADIUS_METERS: u32 = 500;
pub const ON_GROUND_REPORTER: &str = "On-ground Personnel";
pub const ON_GROUND_DEFAULT_DESCRIPTION: &str = "New Camera Created";

/// Everything the registry knows about a camera apart from its id. This is
/// also the body of a create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraProfile {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub private_govt: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub contact_no: Option<String>,
    #[serde(deserialize_with = "de_coordinate")]
    pub latitude: f64,
    #[serde(deserialize_with = "de_coordinate")]
    pub longitude: f64,
    #[serde(default)]
    pub coverage: Option<String>,
    #[serde(default)]
    pub backup: Option<String>,
    #[serde(default)]
    pub connected_network: Option<ConnectedNetwork>,
    #[serde(default)]
    pub status: CameraStatus,
}

impl CameraProfile {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            location: None,
            private_govt: None,
            owner_name: None,
            contact_no: None,
            latitude,
            longitude,
            coverage: None,
            backup: None,
            connected_network: None,
            status: CameraStatus::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ApiException> {
        validate_coordinates(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    #[serde(flatten)]
    pub profile: CameraProfile,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_govt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub contact_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_network: Option<ConnectedNetwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CameraStatus>,
}

impl CameraPatch {
    pub fn apply(self, profile: &mut CameraProfile) {
        if let Some(v) = self.location {
            profile.location = Some(v);
        }
        if let Some(v) = self.private_govt {
            profile.private_govt = Some(v);
        }
        if let Some(v) = self.owner_name {
            profile.owner_name = Some(v);
        }
        if let Some(v) = self.contact_no {
            profile.contact_no = Some(v);
        }
        if let Some(v) = self.latitude {
            profile.latitude = v;
        }
        if let Some(v) = self.longitude {
            profile.longitude = v;
        }
        if let Some(v) = self.coverage {
            profile.coverage = Some(v);
        }
        if let Some(v) = self.backup {
            profile.backup = Some(v);
        }
        if let Some(v) = self.connected_network {
            profile.connected_network = Some(v);
        }
        if let Some(v) = self.status {
            profile.status = v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    #[serde(default)]
    pub camera_id: Option<CameraId>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub reported_by: Option<String>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub reported_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn is_pending(&self) -> bool {
        self.status == TicketStatus::Pending
    }
}

/// A ticket's camera as shown during triage. `id` is always the ticket's id;
/// the camera's own id is kept in `camera_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketDetail {
    pub id: TicketId,
    pub camera_id: CameraId,
    #[serde(flatten)]
    pub camera: CameraProfile,
}

impl TicketDetail {
    pub fn merge(ticket_id: TicketId, camera: Camera) -> Self {
        Self {
            id: ticket_id,
            camera_id: camera.id,
            camera: camera.profile,
        }
    }
}

/// Body of `PUT /tickets/{id}`; the status itself travels in the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketStatusBody {
    pub id: TicketId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketStatusQuery {
    pub status: TicketStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportIssueRequest {
    #[serde(default)]
    pub camera_id: Option<CameraId>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reported_by: Option<String>,
}

fn default_on_ground_description() -> String {
    ON_GROUND_DEFAULT_DESCRIPTION.to_string()
}

/// Field staff register a camera and open a review ticket for it in one go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnGroundCameraRequest {
    #[serde(flatten)]
    pub profile: CameraProfile,
    #[serde(default = "default_on_ground_description")]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraTicketCreated {
    pub camera: Camera,
    pub ticket: Ticket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatusFilter {
    #[default]
    Any,
    Working,
    NotWorking,
}

impl From<String> for StatusFilter {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "working" => StatusFilter::Working,
            "not working" => StatusFilter::NotWorking,
            _ => StatusFilter::Any,
        }
    }
}

impl From<StatusFilter> for String {
    fn from(value: StatusFilter) -> Self {
        match value {
            StatusFilter::Any => String::new(),
            StatusFilter::Working => "working".to_string(),
            StatusFilter::NotWorking => "not working".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OwnershipFilter {
    #[default]
    Any,
    Government,
    Private,
}

impl From<String> for OwnershipFilter {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "government" => OwnershipFilter::Government,
            "private" => OwnershipFilter::Private,
            _ => OwnershipFilter::Any,
        }
    }
}

impl From<OwnershipFilter> for String {
    fn from(value: OwnershipFilter) -> Self {
        match value {
            OwnershipFilter::Any => String::new(),
            OwnershipFilter::Government => "government".to_string(),
            OwnershipFilter::Private => "private".to_string(),
        }
    }
}

fn default_radius_meters() -> u32 {
    DEFAULT_NEARBY_RADIUS_METERS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyCamerasRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_radius_meters")]
    pub radius_meters: u32,
    #[serde(default)]
    pub status_filter: Option<StatusFilter>,
    #[serde(default)]
    pub ownership_filter: Option<OwnershipFilter>,
}

impl NearbyCamerasRequest {
    pub fn around(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_meters: DEFAULT_NEARBY_RADIUS_METERS,
            status_filter: None,
            ownership_filter: None,
        }
    }

    pub fn validate(&self) -> Result<(), ApiException> {
        if self.radius_meters == 0 {
            return Err(ApiException::new(
                ErrorCode::Validation,
                "radius_meters must be positive",
            ));
        }
        validate_coordinates(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyCamera {
    #[serde(flatten)]
    pub camera: Camera,
    pub camera_id: CameraId,
    /// Kilometres from the search origin.
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAck {
    pub message: String,
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), ApiException> {
    if !latitude_in_range(latitude) {
        return Err(ApiException::new(
            ErrorCode::Validation,
            format!("Latitude must be in the [-90; 90] range. Got {latitude}"),
        ));
    }
    if !longitude_in_range(longitude) {
        return Err(ApiException::new(
            ErrorCode::Validation,
            format!("Longitude must be in the [-180; 180] range. Got {longitude}"),
        ));
    }
    Ok(())
}
