//! Client side of the CCTV registry: the ticket triage controller, the store
//! seams it depends on, and the HTTP adapter for the registry backend.

pub mod config;
pub mod error;
pub mod transport;
pub mod workflow;

pub use config::{load_client_settings, ClientSettings};
pub use error::WorkflowError;
pub use transport::{CameraDirectory, HttpBackend, TicketStore};
pub use workflow::{
    DetailView, Notice, TicketWorkflowController, TransitionOutcome, WorkflowEvent,
    WorkflowFailure, WorkflowOperation, WorkflowSnapshot, NOTICE_TTL,
};
