//! Row types for the persisted state layout described in spec.md §6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub exposure_sensitivity_level: i16,
    /// Stored as JSON in the DB; keys are {"email","push","in_app"}.
    pub notification_preferences: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn notification_channels(&self) -> HashMap<String, bool> {
        serde_json::from_value(self.notification_preferences.clone()).unwrap_or_default()
    }

    pub fn enabled_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .notification_channels()
            .into_iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(channel, _)| channel)
            .collect();
        channels.sort();
        channels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ActivityType {
    Commute,
    Jogger,
    Cyclist,
}

impl From<crate::domain::ActivityMode> for ActivityType {
    fn from(mode: crate::domain::ActivityMode) -> Self {
        match mode {
            crate::domain::ActivityMode::Commute => ActivityType::Commute,
            crate::domain::ActivityMode::Jogger => ActivityType::Jogger,
            crate::domain::ActivityMode::Cyclist => ActivityType::Cyclist,
        }
    }
}

impl From<ActivityType> for crate::domain::ActivityMode {
    fn from(value: ActivityType) -> Self {
        match value {
            ActivityType::Commute => crate::domain::ActivityMode::Commute,
            ActivityType::Jogger => crate::domain::ActivityMode::Jogger,
            ActivityType::Cyclist => crate::domain::ActivityMode::Cyclist,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SavedRoute {
    pub id: Uuid,
    pub user_id: Uuid,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub destination_lat: f64,
    pub destination_lon: f64,
    pub activity_type: ActivityType,
    pub last_upes_score: Option<f64>,
    pub last_upes_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NetcdfFile {
    pub id: Uuid,
    pub file_name: String,
    pub bucket_path: String,
    pub timestamp: DateTime<Utc>,
    pub gas_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RouteExposureHistory {
    pub id: Uuid,
    pub route_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub upes_score: f64,
    pub max_upes_along_route: f64,
    pub score_source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AlertType {
    RouteDeterioration,
    Hazard,
    WindShift,
    TimeBased,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::RouteDeterioration => "route_deterioration",
            AlertType::Hazard => "hazard",
            AlertType::WindShift => "wind_shift",
            AlertType::TimeBased => "time_based",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub route_id: Uuid,
    pub alert_type: AlertType,
    pub score_before: f64,
    pub score_after: f64,
    pub threshold: f64,
    /// DB column name is `metadata`; the field name here mirrors the spec's
    /// `alert_metadata`, bridged by the sqlx `rename` below.
    #[sqlx(rename = "metadata")]
    pub alert_metadata: serde_json::Value,
    pub notified_channels: Vec<String>,
    pub created_at: DateTime<Utc>,
}
