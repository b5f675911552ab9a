//! Gateway request and response types

use crate::state_machine::{HistoryEntry, NewSession, Reply, Session, Submission};
use chrono::NaiveDateTime;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Timestamp layouts the gateway has been seen to send
const TRANSACTION_TIME_FORMATS: [&str; 2] = ["%Y%m%d(T)%H:%M:%S", "%Y%m%dT%H:%M:%S"];

/// Left unescaped in the outbound response string
const RESPONSE_STRING: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'/');

/// Why an inbound request was turned away before reaching the engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid transaction time: {0}")]
    InvalidTimestamp(String),
    #[error("Invalid response flag: {0}")]
    InvalidResponseFlag(String),
}

/// One inbound gateway request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UssdRequest {
    pub transaction_id: String,
    pub transaction_time: NaiveDateTime,
    pub msisdn: String,
    pub service_code: String,
    /// What the subscriber typed; empty on the first request
    pub request_string: String,
    /// Whether this answers a previously open request
    pub response: Option<bool>,
}

impl UssdRequest {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, RequestError> {
        let transaction_id = required(params, "transactionId")?;
        let transaction_time = parse_transaction_time(&required(params, "transactionTime")?)?;
        let msisdn = required(params, "msisdn")?;
        let service_code = required(params, "ussdServiceCode")?;
        let request_string = params.get("ussdRequestString").cloned().unwrap_or_default();
        let response = match params.get("response").map(|s| s.trim()) {
            None | Some("") => None,
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(other) => return Err(RequestError::InvalidResponseFlag(other.to_string())),
        };

        Ok(Self {
            transaction_id,
            transaction_time,
            msisdn,
            service_code,
            request_string,
            response,
        })
    }

    pub fn new_session(&self) -> NewSession {
        NewSession {
            transaction_id: self.transaction_id.clone(),
            msisdn: self.msisdn.clone(),
            service_code: self.service_code.clone(),
        }
    }
}

fn required(params: &HashMap<String, String>, name: &'static str) -> Result<String, RequestError> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(RequestError::MissingField(name))
}

fn parse_transaction_time(raw: &str) -> Result<NaiveDateTime, RequestError> {
    TRANSACTION_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| RequestError::InvalidTimestamp(raw.to_string()))
}

/// Outbound wire body: `responseString=<percent-encoded>&action=<continue|end>`
pub fn encode_reply(reply: &Reply) -> String {
    format!(
        "responseString={}&action={}",
        utf8_percent_encode(&reply.text, RESPONSE_STRING),
        reply.action
    )
}

/// Operator view of one session
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session: Session,
    pub history: Vec<HistoryEntry>,
    pub submissions: Vec<Submission>,
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
