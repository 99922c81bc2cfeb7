//! # messages
//!
//! why: the handshake runs before any modifier is active, so it has its own
//! plain binary encoding
//! relations: sent by client.rs and server.rs inside length frames
//! what: ClientMessage, ServerMessage, StatusCode, async send/receive helpers

use super::protocols::{ApplicationProtocol, ModifierProtocol};
use crate::error::NegotiationError;
use crate::framing;
use bytes::{BufMut, BytesMut};
use raft_core::marshal::{get_i32, get_string, put_string};
use tokio::io::{AsyncRead, AsyncWrite};

/// Both ends open with this before anything else
pub const MAGIC: &str = "RAFT_CLUSTER";

/// Handshake messages are small; anything bigger is not a handshake
pub const MAX_HANDSHAKE_FRAME: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Failure,
}

impl StatusCode {
    fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }

    fn from_code(code: i32) -> Result<Self, NegotiationError> {
        match code {
            0 => Ok(Self::Success),
            1 => Ok(Self::Failure),
            other => Err(NegotiationError::Unexpected(format!("status code {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    InitialMagic(String),
    ApplicationProtocolRequest {
        category: String,
        versions: Vec<u32>,
    },
    ModifierProtocolRequest {
        category: String,
        implementations: Vec<String>,
    },
    SwitchOverRequest {
        application: ApplicationProtocol,
        modifiers: Vec<ModifierProtocol>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    InitialMagic(String),
    ApplicationProtocolResponse {
        status: StatusCode,
        category: String,
        version: u32,
    },
    ModifierProtocolResponse {
        status: StatusCode,
        category: String,
        implementation: String,
    },
    SwitchOverResponse {
        status: StatusCode,
    },
}

fn put_count(buf: &mut BytesMut, count: usize) {
    buf.put_i32(count as i32);
}

fn get_count(buf: &mut &[u8]) -> Result<usize, NegotiationError> {
    let count = get_i32(buf)?;
    usize::try_from(count).map_err(|_| raft_core::MarshalError::InvalidLength(count as i64).into())
}

fn get_version(buf: &mut &[u8]) -> Result<u32, NegotiationError> {
    let version = get_i32(buf)?;
    u32::try_from(version).map_err(|_| NegotiationError::Unexpected(format!("version {version}")))
}

impl ClientMessage {
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::InitialMagic(magic) => {
                buf.put_i32(0);
                put_string(buf, magic);
            }
            Self::ApplicationProtocolRequest { category, versions } => {
                buf.put_i32(1);
                put_string(buf, category);
                put_count(buf, versions.len());
                for version in versions {
                    buf.put_i32(*version as i32);
                }
            }
            Self::ModifierProtocolRequest {
                category,
                implementations,
            } => {
                buf.put_i32(2);
                put_string(buf, category);
                put_count(buf, implementations.len());
                for implementation in implementations {
                    put_string(buf, implementation);
                }
            }
            Self::SwitchOverRequest {
                application,
                modifiers,
            } => {
                buf.put_i32(3);
                put_string(buf, &application.category);
                buf.put_i32(application.version as i32);
                put_count(buf, modifiers.len());
                for modifier in modifiers {
                    put_string(buf, &modifier.category);
                    put_string(buf, &modifier.implementation);
                }
            }
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, NegotiationError> {
        let buf = &mut buf;
        let message = match get_i32(buf)? {
            0 => Self::InitialMagic(get_string(buf)?),
            1 => {
                let category = get_string(buf)?;
                let count = get_count(buf)?;
                let versions = (0..count).map(|_| get_version(buf)).collect::<Result<_, _>>()?;
                Self::ApplicationProtocolRequest { category, versions }
            }
            2 => {
                let category = get_string(buf)?;
                let count = get_count(buf)?;
                let implementations = (0..count).map(|_| get_string(buf)).collect::<Result<_, _>>()?;
                Self::ModifierProtocolRequest {
                    category,
                    implementations,
                }
            }
            3 => {
                let application = ApplicationProtocol::new(get_string(buf)?, get_version(buf)?);
                let count = get_count(buf)?;
                let mut modifiers = Vec::with_capacity(count.min(16));
                for _ in 0..count {
                    modifiers.push(ModifierProtocol::new(get_string(buf)?, get_string(buf)?));
                }
                Self::SwitchOverRequest {
                    application,
                    modifiers,
                }
            }
            other => return Err(NegotiationError::Unexpected(format!("client message code {other}"))),
        };
        Ok(message)
    }
}

impl ServerMessage {
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::InitialMagic(magic) => {
                buf.put_i32(0);
                put_string(buf, magic);
            }
            Self::ApplicationProtocolResponse {
                status,
                category,
                version,
            } => {
                buf.put_i32(1);
                buf.put_i32(status.code());
                put_string(buf, category);
                buf.put_i32(*version as i32);
            }
            Self::ModifierProtocolResponse {
                status,
                category,
                implementation,
            } => {
                buf.put_i32(2);
                buf.put_i32(status.code());
                put_string(buf, category);
                put_string(buf, implementation);
            }
            Self::SwitchOverResponse { status } => {
                buf.put_i32(3);
                buf.put_i32(status.code());
            }
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, NegotiationError> {
        let buf = &mut buf;
        let message = match get_i32(buf)? {
            0 => Self::InitialMagic(get_string(buf)?),
            1 => Self::ApplicationProtocolResponse {
                status: StatusCode::from_code(get_i32(buf)?)?,
                category: get_string(buf)?,
                version: get_version(buf)?,
            },
            2 => Self::ModifierProtocolResponse {
                status: StatusCode::from_code(get_i32(buf)?)?,
                category: get_string(buf)?,
                implementation: get_string(buf)?,
            },
            3 => Self::SwitchOverResponse {
                status: StatusCode::from_code(get_i32(buf)?)?,
            },
            other => return Err(NegotiationError::Unexpected(format!("server message code {other}"))),
        };
        Ok(message)
    }
}

pub(crate) async fn send_client<S>(stream: &mut S, message: &ClientMessage) -> Result<(), NegotiationError>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    message.encode(&mut buf);
    framing::write_frame(stream, &buf).await?;
    Ok(())
}

pub(crate) async fn send_server<S>(stream: &mut S, message: &ServerMessage) -> Result<(), NegotiationError>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    message.encode(&mut buf);
    framing::write_frame(stream, &buf).await?;
    Ok(())
}

pub(crate) async fn receive_client<S>(stream: &mut S) -> Result<ClientMessage, NegotiationError>
where
    S: AsyncRead + Unpin,
{
    match framing::read_frame(stream, MAX_HANDSHAKE_FRAME).await? {
        Some(frame) => ClientMessage::decode(&frame),
        None => Err(NegotiationError::Closed),
    }
}

pub(crate) async fn receive_server<S>(stream: &mut S) -> Result<ServerMessage, NegotiationError>
where
    S: AsyncRead + Unpin,
{
    match framing::read_frame(stream, MAX_HANDSHAKE_FRAME).await? {
        Some(frame) => ServerMessage::decode(&frame),
        None => Err(NegotiationError::Closed),
    }
}
