use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match TextOrNumber::deserialize(deserializer)? {
                    TextOrNumber::Text(text) => Ok(Self(text)),
                    TextOrNumber::Int(value) => Ok(Self(value.to_string())),
                    TextOrNumber::Float(value) => Ok(Self(value.to_string())),
                }
            }
        }
    };
}

id_newtype!(CameraId);
id_newtype!(TicketId);

/// Backends built on document stores hand out string ids while older
/// deployments used integers; both are accepted and normalised to text.
#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TicketStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Pending => "Pending",
            TicketStatus::Accepted => "Accepted",
            TicketStatus::Rejected => "Rejected",
            TicketStatus::Closed => "Closed",
        }
    }

    pub fn is_decided(self) -> bool {
        matches!(self, TicketStatus::Accepted | TicketStatus::Rejected)
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(TicketStatus::Pending),
            "Accepted" => Ok(TicketStatus::Accepted),
            "Rejected" => Ok(TicketStatus::Rejected),
            "Closed" => Ok(TicketStatus::Closed),
            other => Err(format!("unknown ticket status: {other}")),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two transitions an operator may apply to a pending ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketDecision {
    Accepted,
    Rejected,
}

impl TicketDecision {
    pub fn status(self) -> TicketStatus {
        match self {
            TicketDecision::Accepted => TicketStatus::Accepted,
            TicketDecision::Rejected => TicketStatus::Rejected,
        }
    }
}

impl From<TicketDecision> for TicketStatus {
    fn from(value: TicketDecision) -> Self {
        value.status()
    }
}

/// Operational state of a camera. Bulk imports carry free-form spellings,
/// which are preserved verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum CameraStatus {
    Working,
    NotWorking,
    #[default]
    Pending,
    Other(String),
}

impl CameraStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CameraStatus::Working => "Working",
            CameraStatus::NotWorking => "Not Working",
            CameraStatus::Pending => "Pending",
            CameraStatus::Other(raw) => raw,
        }
    }

    /// Keyword match used by nearby searches; imported sheets write things
    /// like "Yes", "Active" or "-do-" for a working camera.
    pub fn reports_working(&self) -> bool {
        let lower = self.as_str().to_ascii_lowercase();
        if lower.contains("not working") {
            return false;
        }
        ["working", "yes", "-do-", "active"]
            .iter()
            .any(|keyword| lower.contains(keyword))
    }
}

impl From<String> for CameraStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Working" => CameraStatus::Working,
            "Not Working" => CameraStatus::NotWorking,
            "Pending" => CameraStatus::Pending,
            _ => CameraStatus::Other(value),
        }
    }
}

impl From<CameraStatus> for String {
    fn from(value: CameraStatus) -> Self {
        match value {
            CameraStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectedNetwork {
    Yes,
    No,
    Other(String),
}

impl ConnectedNetwork {
    pub fn as_str(&self) -> &str {
        match self {
            ConnectedNetwork::Yes => "Yes",
            ConnectedNetwork::No => "No",
            ConnectedNetwork::Other(raw) => raw,
        }
    }
}

impl From<String> for ConnectedNetwork {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Yes" => ConnectedNetwork::Yes,
            "No" => ConnectedNetwork::No,
            _ => ConnectedNetwork::Other(value),
        }
    }
}

impl From<ConnectedNetwork> for String {
    fn from(value: ConnectedNetwork) -> Self {
        match value {
            ConnectedNetwork::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ConnectedNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn latitude_in_range(latitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude)
}

pub fn longitude_in_range(longitude: f64) -> bool {
    (-180.0..=180.0).contains(&longitude)
}

/// Coordinates arrive either as JSON numbers or as numeric strings.
pub(crate) fn de_coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("invalid coordinate: {text:?}")))?,
        TextOrNumber::Int(value) => value as f64,
        TextOrNumber::Float(value) => value,
    };
    if !value.is_finite() {
        return Err(de::Error::custom("coordinate must be finite"));
    }
    Ok(value)
}

/// Free-text fields that spreadsheet imports sometimes fill with numbers
/// (phone numbers in particular).
pub(crate) fn de_opt_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(
        Option::<TextOrNumber>::deserialize(deserializer)?.map(|value| match value {
            TextOrNumber::Text(text) => text,
            TextOrNumber::Int(value) => value.to_string(),
            TextOrNumber::Float(value) => value.to_string(),
        }),
    )
}

/// Accepts RFC 3339 timestamps as well as naive ISO-8601 ones, which are
/// taken to be UTC.
pub(crate) fn de_opt_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| de::Error::custom(format!("invalid timestamp: {raw:?}")))
}
