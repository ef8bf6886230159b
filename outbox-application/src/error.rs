use outbox_domain::error::OutboxError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("outbox: {0}")]
    Outbox(#[from] OutboxError),

    #[error("validation: {0}")]
    Validation(String),
}
