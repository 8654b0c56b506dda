use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("surface capture failed: {0}")]
    CaptureFailed(String),

    #[error("template load failed: {0}")]
    TemplateLoad(String),

    #[error("image processing failed: {0}")]
    ImageProcessing(String),

    #[error("detector already running")]
    AlreadyRunning,

    #[error("detector needs at least one template or the mask heuristic enabled")]
    NothingToDetect,
}
