//! One-shot greeting to the Datahead collector
//!
//! On startup a networked node announces itself with a single confirmable
//! POST. The outcome is logged; it is never retried.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use coap_lite::{MessageClass, RequestType, ResponseType};
use tracing::{info, warn};

use crate::coap::{CoapEndpoint, RequestError};

/// Collector path receiving greetings
pub const GREETING_PATH: &str = "/dh/hello";

/// Default wait for the collector's answer
pub const GREETING_TIMEOUT: Duration = Duration::from_secs(5);

/// How the collector answered
#[derive(Debug, Clone, PartialEq)]
pub enum GreetingOutcome {
    /// 2.xx response
    Success(ResponseType),
    /// Error response, reset or transport failure
    Error(String),
    /// No response in time
    Timeout,
}

impl fmt::Display for GreetingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GreetingOutcome::Success(code) => write!(f, "ok ({:?})", code),
            GreetingOutcome::Error(reason) => write!(f, "error ({})", reason),
            GreetingOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// Announce `node_name` to the collector at `peer`
pub async fn greet(
    endpoint: &CoapEndpoint,
    peer: SocketAddr,
    node_name: &str,
    timeout: Duration,
) -> GreetingOutcome {
    info!("Greeting collector at {}", peer);

    let outcome = match endpoint
        .request(
            peer,
            RequestType::Post,
            GREETING_PATH,
            node_name.as_bytes(),
            timeout,
        )
        .await
    {
        Ok(response) => match response.header.code {
            MessageClass::Response(code) if is_success(&code) => GreetingOutcome::Success(code),
            MessageClass::Response(code) => GreetingOutcome::Error(format!("{:?}", code)),
            other => GreetingOutcome::Error(format!("unexpected {:?}", other)),
        },
        Err(RequestError::Timeout(_)) => GreetingOutcome::Timeout,
        Err(e) => GreetingOutcome::Error(e.to_string()),
    };

    match &outcome {
        GreetingOutcome::Success(_) => info!("Greeting response: {}", outcome),
        _ => warn!("Greeting response: {}", outcome),
    }

    outcome
}

fn is_success(code: &ResponseType) -> bool {
    matches!(
        code,
        ResponseType::Created
            | ResponseType::Deleted
            | ResponseType::Valid
            | ResponseType::Changed
            | ResponseType::Content
    )
}
