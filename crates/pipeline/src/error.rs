use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("VAD model error: {0}")]
    Vad(String),

    #[error("model initialization failed: {0}")]
    Model(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("worker queue is full, request dropped")]
    QueueFull,

    #[error("worker has been stopped")]
    WorkerStopped,
}

impl From<voice_agent_core::Error> for PipelineError {
    fn from(err: voice_agent_core::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}
