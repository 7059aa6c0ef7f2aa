use std::time::Duration;

use thiserror::Error;

use crate::survey::QuestionId;

/// Errors from the local persisted session store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("session store migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("stored user record is not valid JSON: {0}")]
    User(#[from] serde_json::Error),
}

/// Errors returned by the remote API client.
///
/// Callers branch on the first three variants: an expired session sends the
/// user back to the login page, an invalid authorization asks for a fresh
/// login, and anything else is shown as-is.
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP 401 on an authenticated call. The session has been cleared.
    #[error("session expired, please log in again")]
    SessionExpired,

    /// HTTP 422, the backend could not make sense of the bearer token.
    #[error("authorization error, please log in again")]
    AuthorizationInvalid,

    /// Any other non-2xx response.
    #[error("{message} (HTTP {status})")]
    Server { status: u16, message: String },

    /// No complete response within the configured deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not reach the prediction service: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// Whether the caller should route the user back to the login page.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::AuthorizationInvalid)
    }
}

/// A model key that names none of the prediction models.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("model {0:?} not found, try one of: logistic, random_forest, gradient_boost")]
pub struct UnknownModel(pub String);

/// Errors raised by the survey wizard when a transition is not allowed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WizardError {
    #[error("answer every question in this step before continuing")]
    StepIncomplete,

    #[error("already at the first step")]
    AtFirstStep,

    #[error("already at the last step, submit instead")]
    AtLastStep,

    #[error("the survey can only be submitted from the last step")]
    NotLastStep,

    #[error("a submission is already in progress")]
    SubmissionInFlight,

    #[error("{question} has no option {value:?}")]
    UnknownOption { question: QuestionId, value: String },

    #[error("{question} expects a number, got {value:?}")]
    InvalidNumber { question: QuestionId, value: String },
}
