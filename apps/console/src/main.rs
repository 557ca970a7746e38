use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    config::base_url, load_client_settings, CameraDirectory, HttpBackend, TicketStore,
    TicketWorkflowController, TransitionOutcome,
};
use shared::{
    domain::{CameraId, CameraStatus, ConnectedNetwork, TicketDecision, TicketId},
    protocol::{
        CameraPatch, CameraProfile, NearbyCamerasRequest, OnGroundCameraRequest, OwnershipFilter,
        ReportIssueRequest, StatusFilter, Ticket, DEFAULT_NEARBY_RADIUS_METERS,
        ON_GROUND_DEFAULT_DESCRIPTION,
    },
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cctv-console", about = "Operator console for the CCTV registry")]
struct Cli {
    /// Overrides the configured backend url for this invocation.
    #[arg(long)]
    backend_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tickets awaiting triage.
    Tickets,
    /// Show the camera behind a pending ticket.
    Show { ticket_id: String },
    Accept { ticket_id: String },
    Reject { ticket_id: String },
    /// Close a ticket that has already been accepted or rejected.
    Close { ticket_id: String },
    #[command(subcommand)]
    Camera(CameraCommand),
    /// Cameras around a point, closest first.
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        latitude: f64,
        #[arg(long, allow_hyphen_values = true)]
        longitude: f64,
        #[arg(long, default_value_t = DEFAULT_NEARBY_RADIUS_METERS)]
        radius: u32,
        /// "working" or "not working"
        #[arg(long)]
        status: Option<String>,
        /// "government" or "private"
        #[arg(long)]
        ownership: Option<String>,
    },
    /// Bulk import cameras from an .xlsx or .xls sheet.
    Upload { path: PathBuf },
    /// File a ticket against a camera.
    Report {
        #[arg(long)]
        camera_id: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        reported_by: Option<String>,
    },
    Health,
    /// Print the effective settings.
    Config,
}

#[derive(Subcommand, Debug)]
enum CameraCommand {
    Get { camera_id: String },
    Create(CreateCamera),
    /// Change selected fields of a camera record.
    Update(UpdateCamera),
    Delete { camera_id: String },
}

#[derive(Args, Debug)]
struct UpdateCamera {
    camera_id: String,
    #[arg(long, allow_hyphen_values = true)]
    latitude: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    longitude: Option<f64>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    owner_name: Option<String>,
    #[arg(long)]
    private_govt: Option<String>,
    #[arg(long)]
    contact_no: Option<String>,
    #[arg(long)]
    coverage: Option<String>,
    #[arg(long)]
    backup: Option<String>,
    #[arg(long)]
    connected_network: Option<String>,
    #[arg(long)]
    status: Option<String>,
}

impl UpdateCamera {
    fn patch(self) -> CameraPatch {
        CameraPatch {
            location: self.location,
            private_govt: self.private_govt,
            owner_name: self.owner_name,
            contact_no: self.contact_no,
            latitude: self.latitude,
            longitude: self.longitude,
            coverage: self.coverage,
            backup: self.backup,
            connected_network: self.connected_network.map(ConnectedNetwork::from),
            status: self.status.map(CameraStatus::from),
        }
    }
}

#[derive(Args, Debug)]
struct CreateCamera {
    #[arg(long, allow_hyphen_values = true)]
    latitude: f64,
    #[arg(long, allow_hyphen_values = true)]
    longitude: f64,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    owner_name: Option<String>,
    #[arg(long)]
    private_govt: Option<String>,
    #[arg(long)]
    contact_no: Option<String>,
    #[arg(long)]
    coverage: Option<String>,
    #[arg(long)]
    backup: Option<String>,
    #[arg(long)]
    connected_network: Option<String>,
    #[arg(long)]
    status: Option<String>,
    /// Register as field staff, which also opens a review ticket.
    #[arg(long)]
    on_ground: bool,
    #[arg(long, requires = "on_ground")]
    description: Option<String>,
}

impl CreateCamera {
    fn profile(&self) -> CameraProfile {
        CameraProfile {
            location: self.location.clone(),
            owner_name: self.owner_name.clone(),
            private_govt: self.private_govt.clone(),
            contact_no: self.contact_no.clone(),
            coverage: self.coverage.clone(),
            backup: self.backup.clone(),
            connected_network: self.connected_network.clone().map(ConnectedNetwork::from),
            status: self
                .status
                .clone()
                .map(CameraStatus::from)
                .unwrap_or_default(),
            ..CameraProfile::at(self.latitude, self.longitude)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_client_settings();
    if let Some(raw) = &cli.backend_url {
        settings.backend_url = base_url(raw)
            .with_context(|| format!("invalid --backend-url {raw}"))?
            .to_string();
    }
    let backend = Arc::new(HttpBackend::from_settings(&settings)?);
    info!(backend_url = %settings.backend_url, "console ready");

    match cli.command {
        Command::Tickets => {
            let controller = TicketWorkflowController::from_backend(backend);
            let pending = controller.load_pending_tickets().await?;
            if pending.is_empty() {
                println!("No pending tickets.");
            }
            for ticket in &pending {
                print_ticket_line(ticket);
            }
        }
        Command::Show { ticket_id } => {
            let controller = TicketWorkflowController::from_backend(backend.clone());
            let ticket = find_ticket(backend.as_ref(), &TicketId::new(ticket_id)).await?;
            let detail = controller.open_ticket(&ticket).await?;
            print_ticket_line(&ticket);
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Command::Accept { ticket_id } => {
            decide(backend, TicketId::new(ticket_id), TicketDecision::Accepted).await?;
        }
        Command::Reject { ticket_id } => {
            decide(backend, TicketId::new(ticket_id), TicketDecision::Rejected).await?;
        }
        Command::Close { ticket_id } => {
            let ticket = backend.close_ticket(&TicketId::new(ticket_id)).await?;
            println!("ticket {} is {}", ticket.id, ticket.status);
        }
        Command::Camera(CameraCommand::Get { camera_id }) => {
            let camera = backend.fetch_camera(&CameraId::new(camera_id)).await?;
            println!("{}", serde_json::to_string_pretty(&camera)?);
        }
        Command::Camera(CameraCommand::Create(args)) => {
            let profile = args.profile();
            if args.on_ground {
                let created = backend
                    .create_camera_with_ticket(&OnGroundCameraRequest {
                        profile,
                        description: args
                            .description
                            .clone()
                            .unwrap_or_else(|| ON_GROUND_DEFAULT_DESCRIPTION.to_string()),
                    })
                    .await?;
                println!(
                    "created camera {} with review ticket {}",
                    created.camera.id, created.ticket.id
                );
            } else {
                let camera = backend.create_camera(&profile).await?;
                println!("created camera {}", camera.id);
            }
        }
        Command::Camera(CameraCommand::Update(args)) => {
            let camera_id = CameraId::new(args.camera_id.clone());
            let patch = args.patch();
            let camera = backend.update_camera(&camera_id, &patch).await?;
            println!("{}", serde_json::to_string_pretty(&camera)?);
        }
        Command::Camera(CameraCommand::Delete { camera_id }) => {
            let camera_id = CameraId::new(camera_id);
            backend.delete_camera(&camera_id).await?;
            println!("deleted camera {camera_id}");
        }
        Command::Nearby {
            latitude,
            longitude,
            radius,
            status,
            ownership,
        } => {
            let query = NearbyCamerasRequest {
                radius_meters: radius,
                status_filter: status.map(StatusFilter::from),
                ownership_filter: ownership.map(OwnershipFilter::from),
                ..NearbyCamerasRequest::around(latitude, longitude)
            };
            let cameras = backend.nearby_cameras(&query).await?;
            if cameras.is_empty() {
                println!("No cameras within {radius} m.");
            }
            for nearby in &cameras {
                println!(
                    "{:>8.0} m  {}  {}  {}",
                    nearby.distance * 1000.0,
                    nearby.camera_id,
                    nearby.camera.profile.status,
                    nearby.camera.profile.location.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Upload { path } => {
            let ack = backend.upload_camera_data(&path).await?;
            println!("{}", ack.message);
        }
        Command::Report {
            camera_id,
            location,
            description,
            reported_by,
        } => {
            let ticket = backend
                .report_issue(&ReportIssueRequest {
                    camera_id: camera_id.map(CameraId::new),
                    location,
                    description,
                    reported_by,
                })
                .await?;
            println!("opened ticket {}", ticket.id);
        }
        Command::Health => {
            backend.health().await?;
            println!("backend at {} is healthy", settings.backend_url);
        }
        Command::Config => {
            println!("backend_url = {}", settings.backend_url);
            println!(
                "maps_api_key = {}",
                if settings.maps_api_key.is_some() {
                    "(set)"
                } else {
                    "(unset)"
                }
            );
            println!(
                "request_timeout_secs = {}",
                settings.request_timeout.as_secs()
            );
        }
    }

    Ok(())
}

async fn decide(
    backend: Arc<HttpBackend>,
    ticket_id: TicketId,
    decision: TicketDecision,
) -> Result<()> {
    let controller = TicketWorkflowController::from_backend(backend);
    match controller.set_ticket_status(&ticket_id, decision).await? {
        TransitionOutcome::Applied(_) => {
            let snapshot = controller.snapshot().await;
            if let Some(notice) = snapshot.notification {
                println!("{}: {}", notice.title, notice.description);
            }
            println!("{} tickets still pending", snapshot.pending_tickets.len());
            if let Some(failure) = snapshot.last_error {
                eprintln!("warning: queue resync failed: {}", failure.error);
            }
        }
        TransitionOutcome::AlreadyInFlight => {
            println!("ticket {ticket_id} is already being updated");
        }
    }
    Ok(())
}

async fn find_ticket(store: &dyn TicketStore, ticket_id: &TicketId) -> Result<Ticket> {
    let tickets = store.list_tickets().await?;
    match tickets.into_iter().find(|ticket| &ticket.id == ticket_id) {
        Some(ticket) => Ok(ticket),
        None => bail!("ticket {ticket_id} not found"),
    }
}

fn print_ticket_line(ticket: &Ticket) {
    let camera = ticket
        .camera_id
        .as_ref()
        .map(CameraId::as_str)
        .unwrap_or("-");
    let reported_at = ticket
        .reported_at
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  [{}]  camera {}  {}  {}",
        ticket.id,
        ticket.status,
        camera,
        reported_at,
        ticket.description.as_deref().unwrap_or("")
    );
}
