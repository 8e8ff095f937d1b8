//! Protocol message definitions
//!
//! A [`Message`] is the raw framed unit. [`Request`] and [`Response`] are the
//! typed messages of the registration exchange built on top of it.

use bytes::Bytes;
use thiserror::Error;

use super::message_types::{NEW_REGISTRATION, REGISTRATION_ERROR, REGISTRATION_OK};

/// Errors raised while interpreting a decoded message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Payload of message type {0} is not valid UTF-8")]
    InvalidUtf8(u8),

    #[error("Message type {msg_type} must have an empty payload, got {len} bytes")]
    UnexpectedPayload { msg_type: u8, len: usize },
}

/// A discrete unit of application data sent over a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Semantic kind of the message
    pub msg_type: u8,
    /// Raw payload bytes, possibly empty
    pub payload: Bytes,
}

impl Message {
    pub fn new(msg_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// A message carrying no payload
    pub fn empty(msg_type: u8) -> Self {
        Self::new(msg_type, Bytes::new())
    }

    /// Interpret the payload as UTF-8 text
    pub fn text(&self) -> Result<&str, MessageError> {
        std::str::from_utf8(&self.payload).map_err(|_| MessageError::InvalidUtf8(self.msg_type))
    }
}

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Register a name with the server
    NewRegistration { name: String },
}

impl Request {
    /// Get the message type identifier
    pub fn type_id(&self) -> u8 {
        match self {
            Request::NewRegistration { .. } => NEW_REGISTRATION,
        }
    }

    pub fn to_message(&self) -> Message {
        match self {
            Request::NewRegistration { name } => {
                Message::new(self.type_id(), Bytes::copy_from_slice(name.as_bytes()))
            }
        }
    }
}

impl TryFrom<&Message> for Request {
    type Error = MessageError;

    fn try_from(message: &Message) -> Result<Self, Self::Error> {
        match message.msg_type {
            NEW_REGISTRATION => Ok(Request::NewRegistration {
                name: message.text()?.to_string(),
            }),
            other => Err(MessageError::UnknownMessageType(other)),
        }
    }
}

/// Messages sent by the server, always in reply to a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Registration accepted
    RegistrationOk,
    /// Registration rejected
    RegistrationError { message: String },
}

impl Response {
    /// Get the message type identifier
    pub fn type_id(&self) -> u8 {
        match self {
            Response::RegistrationOk => REGISTRATION_OK,
            Response::RegistrationError { .. } => REGISTRATION_ERROR,
        }
    }

    pub fn to_message(&self) -> Message {
        match self {
            Response::RegistrationOk => Message::empty(self.type_id()),
            Response::RegistrationError { message } => {
                Message::new(self.type_id(), Bytes::copy_from_slice(message.as_bytes()))
            }
        }
    }
}

impl TryFrom<&Message> for Response {
    type Error = MessageError;

    fn try_from(message: &Message) -> Result<Self, Self::Error> {
        match message.msg_type {
            REGISTRATION_OK if message.payload.is_empty() => Ok(Response::RegistrationOk),
            REGISTRATION_OK => Err(MessageError::UnexpectedPayload {
                msg_type: REGISTRATION_OK,
                len: message.payload.len(),
            }),
            REGISTRATION_ERROR => Ok(Response::RegistrationError {
                message: message.text()?.to_string(),
            }),
            other => Err(MessageError::UnknownMessageType(other)),
        }
    }
}
