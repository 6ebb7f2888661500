//! Capture devices for session tests

use async_trait::async_trait;
use meshcall::media::{LocalStream, MediaConstraints, MediaDevices};
use meshcall::MediaAccessError;
use parking_lot::Mutex;

/// Grants access and keeps a copy of every stream it handed out
#[derive(Debug, Default)]
pub struct RecordingDevices {
    captured: Mutex<Vec<LocalStream>>,
}

impl RecordingDevices {
    pub fn captured(&self) -> Vec<LocalStream> {
        self.captured.lock().clone()
    }

    /// Whether any captured track is still live
    pub fn any_live(&self) -> bool {
        self.captured
            .lock()
            .iter()
            .flat_map(|s| s.tracks().iter())
            .any(|t| t.is_live())
    }
}

#[async_trait]
impl MediaDevices for RecordingDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalStream, MediaAccessError> {
        let stream = LocalStream::capture(constraints);
        self.captured.lock().push(stream.clone());
        Ok(stream)
    }
}

/// Refuses every request
#[derive(Debug)]
pub struct DenyingDevices(pub MediaAccessError);

#[async_trait]
impl MediaDevices for DenyingDevices {
    async fn get_user_media(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<LocalStream, MediaAccessError> {
        Err(self.0.clone())
    }
}
