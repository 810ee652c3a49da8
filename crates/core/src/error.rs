use thiserror::Error;

#[derive(Error, Debug)]
pub enum NimbusError {
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Config error: {0}")]
    Config(String),
}
