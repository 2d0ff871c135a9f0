use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize history store: {0}")]
    History(#[source] anyhow::Error),

    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("Failed to initialize vector index client: {0}")]
    VectorIndex(#[source] anyhow::Error),

    #[error("Failed to initialize generation client: {0}")]
    Generation(#[source] anyhow::Error),
}
