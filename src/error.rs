//! Error taxonomy for the detection session and the template gallery.
//!
//! Camera and model failures are terminal for the operation that raised them and
//! carry a user-facing message per subtype. Storage failures are recoverable: the
//! gallery degrades and retries before giving up. Per-tick detection failures never
//! surface as errors; the session loop logs them and backs off.

use std::fmt;

/// Camera acquisition failure. Terminal for `start()` and `switch_camera()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraError {
    /// Permission to use the camera was refused.
    Denied,
    /// No device exists for the requested facing mode.
    NotFound,
    /// The device exists but another process holds it.
    Busy,
    Other(String),
}

impl CameraError {
    /// Stable code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            CameraError::Denied => "camera_denied",
            CameraError::NotFound => "camera_not_found",
            CameraError::Busy => "camera_busy",
            CameraError::Other(_) => "camera_other",
        }
    }

    /// Message shown and spoken to the user.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::Denied => {
                "Camera access was denied. Allow camera access and try again.".to_string()
            }
            CameraError::NotFound => {
                "No camera device was found. Make sure a camera is connected.".to_string()
            }
            CameraError::Busy => {
                "The camera is in use by another application. Close it and try again."
                    .to_string()
            }
            CameraError::Other(detail) => format!("Camera access failed: {detail}"),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::Other(detail) => write!(f, "{}: {}", self.code(), detail),
            _ => write!(f, "{}", self.code()),
        }
    }
}

impl std::error::Error for CameraError {}

/// The detector could not be constructed, warmed up, or given the template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelLoadError {
    pub message: String,
}

impl ModelLoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn user_message(&self) -> String {
        "Failed to load the detection model. Refresh and try again.".to_string()
    }
}

impl fmt::Display for ModelLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model_load: {}", self.message)
    }
}

impl std::error::Error for ModelLoadError {}

/// Failure of a requested session operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionError {
    Camera(CameraError),
    ModelLoad(ModelLoadError),
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Camera(err) => err.user_message(),
            SessionError::ModelLoad(err) => err.user_message(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Camera(err) => err.fmt(f),
            SessionError::ModelLoad(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Camera(err) => Some(err),
            SessionError::ModelLoad(err) => Some(err),
        }
    }
}

impl From<CameraError> for SessionError {
    fn from(err: CameraError) -> Self {
        SessionError::Camera(err)
    }
}

impl From<ModelLoadError> for SessionError {
    fn from(err: ModelLoadError) -> Self {
        SessionError::ModelLoad(err)
    }
}

/// Template store failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageError {
    /// The store refused the write because it is full.
    CapacityExceeded { needed: usize, quota: usize },
    Backend(String),
}

impl StorageError {
    pub fn backend(err: impl fmt::Display) -> Self {
        StorageError::Backend(err.to_string())
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, StorageError::CapacityExceeded { .. })
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::CapacityExceeded { needed, quota } => write!(
                f,
                "storage capacity exceeded: {} bytes needed, quota {} bytes",
                needed, quota
            ),
            StorageError::Backend(detail) => write!(f, "storage backend error: {}", detail),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_errors_have_distinct_user_messages() {
        let messages = [
            CameraError::Denied.user_message(),
            CameraError::NotFound.user_message(),
            CameraError::Busy.user_message(),
            CameraError::Other("unplugged".into()).user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(messages[3].contains("unplugged"));
    }

    #[test]
    fn session_error_wraps_sources() {
        let err: SessionError = CameraError::Busy.into();
        assert_eq!(err.to_string(), "camera_busy");
        assert!(std::error::Error::source(&err).is_some());

        let err: SessionError = ModelLoadError::new("warm-up failed").into();
        assert_eq!(err.to_string(), "model_load: warm-up failed");
        assert!(err.user_message().contains("Refresh"));
    }
}
