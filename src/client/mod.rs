//! Network client for the LMS proxy
//!
//! [`ResilientClient`] adds bearer authentication, bounded exponential-backoff retries
//! and failure classification on top of a [`Transport`]; [`HttpTransport`] is the
//! reqwest implementation used outside of tests.

mod auth;
mod envelope;
mod resilient;
mod transport;

pub use auth::{EnvToken, NoAuth, StaticToken, TokenProvider};
pub use envelope::Envelope;
pub use resilient::{
    backoff_delay, ApiResponse, ClientConfig, ResilientClient, DEFAULT_BASE_DELAY,
    DEFAULT_MAX_RETRIES,
};
pub use transport::{ApiRequest, HttpMethod, HttpTransport, RawResponse, Transport, TransportError};
