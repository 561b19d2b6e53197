use crate::nimbus_api::client::Scope;
use crate::nimbus_api::resources::{ListOptions, PaginatedResponse};
use crate::nimbus_api::types::NimbusError;
use crate::nimbus_api::url::{require_non_empty, validate_identifier, Service};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// A position report for a user or device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            altitude: None,
            recorded_at: None,
        }
    }

    fn validate(&self) -> Result<(), NimbusError> {
        validate_coordinates(self.latitude, self.longitude)?;
        if let Some(accuracy) = self.accuracy {
            if !(accuracy.is_finite() && accuracy >= 0.0) {
                return Err(NimbusError::Validation(format!(
                    "accuracy must be a non-negative number, got {}",
                    accuracy
                )));
            }
        }
        Ok(())
    }
}

/// Location of one subject as stored server-side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectLocation {
    pub subject_id: String,
    #[serde(flatten)]
    pub location: Location,
    #[serde(default)]
    pub distance_meters: Option<f64>,
}

/// Circular geofence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geofence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Location tracking and geofencing
#[derive(Debug, Clone)]
pub struct Locate<'a> {
    scope: Scope<'a>,
}

impl<'a> Locate<'a> {
    pub(crate) fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    pub async fn update_location(
        &self,
        subject_id: &str,
        location: &Location,
    ) -> Result<SubjectLocation, NimbusError> {
        validate_identifier("subject id", subject_id)?;
        location.validate()?;

        let url = self
            .scope
            .realm_url(Service::Locate)
            .await?
            .segment("locations")
            .segment(subject_id)
            .build()?;
        self.scope.send_json(Method::PUT, url, location).await
    }

    pub async fn get_location(&self, subject_id: &str) -> Result<SubjectLocation, NimbusError> {
        validate_identifier("subject id", subject_id)?;
        let url = self
            .scope
            .realm_url(Service::Locate)
            .await?
            .segment("locations")
            .segment(subject_id)
            .build()?;
        self.scope.send(Method::GET, url).await
    }

    /// Subjects within `radius_meters` of a point, nearest first
    pub async fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
        options: &ListOptions,
    ) -> Result<PaginatedResponse<SubjectLocation>, NimbusError> {
        validate_coordinates(latitude, longitude)?;
        validate_radius(radius_meters)?;

        let url = self
            .scope
            .realm_url(Service::Locate)
            .await?
            .segment("locations")
            .query("near", format!("{},{}", latitude, longitude))
            .query("radius", radius_meters);
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn create_geofence(&self, geofence: &Geofence) -> Result<Geofence, NimbusError> {
        require_non_empty("geofence name", &geofence.name)?;
        validate_coordinates(geofence.latitude, geofence.longitude)?;
        validate_radius(geofence.radius_meters)?;

        let url = self
            .scope
            .realm_url(Service::Locate)
            .await?
            .segment("geofences")
            .build()?;
        tracing::debug!("Creating geofence {}", geofence.name);
        self.scope.send_json(Method::POST, url, geofence).await
    }

    pub async fn list_geofences(
        &self,
        options: &ListOptions,
    ) -> Result<PaginatedResponse<Geofence>, NimbusError> {
        let url = self
            .scope
            .realm_url(Service::Locate)
            .await?
            .segment("geofences");
        let url = options.apply(url).build()?;
        self.scope.send(Method::GET, url).await
    }

    pub async fn delete_geofence(&self, id: &str) -> Result<(), NimbusError> {
        validate_identifier("geofence id", id)?;
        let url = self
            .scope
            .realm_url(Service::Locate)
            .await?
            .segment("geofences")
            .segment(id)
            .build()?;
        self.scope.send::<IgnoredAny>(Method::DELETE, url).await?;
        Ok(())
    }
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), NimbusError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(NimbusError::Validation(format!(
            "latitude must be within [-90, 90], got {}",
            latitude
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(NimbusError::Validation(format!(
            "longitude must be within [-180, 180], got {}",
            longitude
        )));
    }
    Ok(())
}

fn validate_radius(radius_meters: f64) -> Result<(), NimbusError> {
    if radius_meters.is_finite() && radius_meters > 0.0 {
        Ok(())
    } else {
        Err(NimbusError::Validation(format!(
            "radius must be a positive number of meters, got {}",
            radius_meters
        )))
    }
}
