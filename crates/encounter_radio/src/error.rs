use thiserror::Error;

/// Errors from radio setup.
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("Address {0} is already on the medium")]
    AddressInUse(String),
}
