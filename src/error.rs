/// Failures on the photo upload path.
///
/// Foreground callers get the first terminal error; the background queue logs
/// these and either retries or drops the item.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Image compression failed: {0}")]
    CompressionFailed(String),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("Image too large: {size} bytes exceeds limit of {limit} bytes")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Failed to create photo metadata: {0}")]
    MetadataCreationFailed(String),

    #[error("Failed to update dependent record: {0}")]
    DependentUpdateFailed(String),
}

impl From<image::ImageError> for UploadError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Decoding(_) | image::ImageError::Unsupported(_) => {
                UploadError::InvalidImage(err.to_string())
            }
            other => UploadError::CompressionFailed(other.to_string()),
        }
    }
}
