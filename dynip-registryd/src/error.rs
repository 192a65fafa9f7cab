/// Why an announcement was not recorded.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("announcement carried an invalid code")]
    Unauthorized,

    #[error("endpoint store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

/// Why a status query produced no address.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("service is not available")]
    NotAvailable,

    #[error("endpoint store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

/// A failed reachability check.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("probe transport error: {0}")]
    Transport(String),

    #[error("unexpected probe body: {0:?}")]
    UnexpectedBody(String),
}
