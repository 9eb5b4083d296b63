use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::capabilities::{GeoPosition, LocationError, LocationResult};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    #[must_use]
    pub const fn latitude(self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub const fn longitude(self) -> f64 {
        self.longitude
    }
}

impl TryFrom<GeoPosition> for Coordinates {
    type Error = CoordinateError;

    fn try_from(position: GeoPosition) -> Result<Self, Self::Error> {
        Self::new(position.latitude, position.longitude)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum LocationState {
    #[default]
    NotRequested,
    Pending,
    Resolved(Coordinates),
    Failed(LocationError),
}

/// Resolves the device position at most once per session.
///
/// `NotRequested -> Pending -> Resolved | Failed`, and both settled states
/// are terminal. Consumers only ever ask [`LocationProvider::available`],
/// which treats pending and failed alike.
#[derive(Debug, Clone, Default)]
pub struct LocationProvider {
    state: LocationState,
}

impl LocationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the caller should issue the one position request.
    ///
    /// A host without geolocation settles straight to `Failed(Unsupported)`.
    #[must_use]
    pub fn start(&mut self, host_supports_location: bool) -> bool {
        if self.state != LocationState::NotRequested {
            debug!(state = ?self.state, "location already requested this session");
            return false;
        }

        if host_supports_location {
            self.state = LocationState::Pending;
            true
        } else {
            warn!("host has no geolocation support");
            self.state = LocationState::Failed(LocationError::Unsupported);
            false
        }
    }

    pub fn settle(&mut self, result: LocationResult) {
        if self.state != LocationState::Pending {
            debug!(state = ?self.state, "ignoring location result outside of a pending request");
            return;
        }

        self.state = match result {
            Ok(position) => match Coordinates::try_from(position) {
                Ok(coordinates) => {
                    debug!("device location resolved");
                    LocationState::Resolved(coordinates)
                }
                Err(e) => {
                    warn!(error = %e, "device reported invalid coordinates");
                    LocationState::Failed(LocationError::Unavailable {
                        message: e.to_string(),
                    })
                }
            },
            Err(e) => {
                warn!(error = %e, "device location failed");
                LocationState::Failed(e)
            }
        };
    }

    pub fn state(&self) -> &LocationState {
        &self.state
    }

    pub fn available(&self) -> Option<Coordinates> {
        match self.state {
            LocationState::Resolved(coordinates) => Some(coordinates),
            _ => None,
        }
    }

    /// The reason shown after "Location Error: ", if the lookup failed.
    pub fn error_message(&self) -> Option<String> {
        match &self.state {
            LocationState::Failed(LocationError::Unsupported) => {
                Some("Geolocation is not supported by your browser.".to_string())
            }
            LocationState::Failed(e) => Some(format!("Failed to get location: {e}")),
            _ => None,
        }
    }

    pub fn status_line(&self) -> String {
        match (&self.state, self.error_message()) {
            (LocationState::Resolved(_), _) => "Location services enabled.".to_string(),
            (_, Some(error)) => format!("Location Error: {error}"),
            _ => "Loading location...".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(latitude: f64, longitude: f64) -> GeoPosition {
        GeoPosition {
            latitude,
            longitude,
            accuracy_m: None,
        }
    }

    mod coordinate_tests {
        use super::*;

        #[test]
        fn test_valid_coordinates() {
            assert!(Coordinates::new(0.0, 0.0).is_ok());
            assert!(Coordinates::new(90.0, 180.0).is_ok());
            assert!(Coordinates::new(-90.0, -180.0).is_ok());
            assert!(Coordinates::new(40.0, -74.0).is_ok());
        }

        #[test]
        fn test_out_of_range() {
            assert!(matches!(
                Coordinates::new(91.0, 0.0),
                Err(CoordinateError::LatitudeOutOfRange(_))
            ));
            assert!(matches!(
                Coordinates::new(0.0, -181.0),
                Err(CoordinateError::LongitudeOutOfRange(_))
            ));
        }

        #[test]
        fn test_non_finite() {
            assert_eq!(
                Coordinates::new(f64::NAN, 0.0),
                Err(CoordinateError::NonFinite)
            );
            assert_eq!(
                Coordinates::new(0.0, f64::INFINITY),
                Err(CoordinateError::NonFinite)
            );
        }
    }

    mod provider_tests {
        use super::*;

        #[test]
        fn test_starts_not_requested_and_unavailable() {
            let provider = LocationProvider::new();
            assert_eq!(provider.state(), &LocationState::NotRequested);
            assert_eq!(provider.available(), None);
            assert_eq!(provider.status_line(), "Loading location...");
        }

        #[test]
        fn test_requests_exactly_once() {
            let mut provider = LocationProvider::new();
            assert!(provider.start(true));
            assert!(!provider.start(true));
            assert_eq!(provider.state(), &LocationState::Pending);
            assert_eq!(provider.available(), None);
        }

        #[test]
        fn test_unsupported_host_fails_without_request() {
            let mut provider = LocationProvider::new();
            assert!(!provider.start(false));
            assert_eq!(
                provider.state(),
                &LocationState::Failed(LocationError::Unsupported)
            );
            assert_eq!(
                provider.status_line(),
                "Location Error: Geolocation is not supported by your browser."
            );
        }

        #[test]
        fn test_resolves() {
            let mut provider = LocationProvider::new();
            let _ = provider.start(true);
            provider.settle(Ok(position(40.0, -74.0)));

            let coordinates = provider.available().unwrap();
            assert_eq!(coordinates.latitude(), 40.0);
            assert_eq!(coordinates.longitude(), -74.0);
            assert_eq!(provider.status_line(), "Location services enabled.");
        }

        #[test]
        fn test_failure_is_terminal() {
            let mut provider = LocationProvider::new();
            let _ = provider.start(true);
            provider.settle(Err(LocationError::PermissionDenied));
            provider.settle(Ok(position(40.0, -74.0)));

            assert_eq!(provider.available(), None);
            assert_eq!(
                provider.status_line(),
                "Location Error: Failed to get location: User denied Geolocation"
            );
            assert!(!provider.start(true));
        }

        #[test]
        fn test_invalid_device_coordinates_count_as_failure() {
            let mut provider = LocationProvider::new();
            let _ = provider.start(true);
            provider.settle(Ok(position(f64::NAN, 10.0)));
            assert!(matches!(
                provider.state(),
                LocationState::Failed(LocationError::Unavailable { .. })
            ));
        }

        #[test]
        fn test_result_before_start_is_ignored() {
            let mut provider = LocationProvider::new();
            provider.settle(Ok(position(1.0, 1.0)));
            assert_eq!(provider.state(), &LocationState::NotRequested);
        }
    }
}
