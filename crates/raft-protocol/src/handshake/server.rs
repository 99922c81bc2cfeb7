//! # server
//!
//! why: the accepting side decides; it answers each request from its own
//! supported set and only switches over to a stack it agreed to
//! relations: uses negotiation.rs for choices and messages.rs for the wire
//! what: HandshakeServer state machine and the async accept driver

use super::messages::{self, ClientMessage, ServerMessage, StatusCode, MAGIC};
use super::negotiation::{select_implementation, select_version};
use super::protocols::{ApplicationProtocol, ProtocolStack, SupportedProtocols};
use crate::error::NegotiationError;
use tokio::io::{AsyncRead, AsyncWrite};

/// What to do after handling one client message
#[derive(Debug)]
pub enum ServerStep {
    Reply(ServerMessage),
    /// Send the reply, then speak `ProtocolStack`
    Finish(ServerMessage, ProtocolStack),
    /// Send the reply, then close
    Abort(ServerMessage, NegotiationError),
}

#[derive(Debug)]
pub struct HandshakeServer {
    supported: SupportedProtocols,
    magic_received: bool,
    application: Option<ApplicationProtocol>,
}

impl HandshakeServer {
    pub fn new(supported: SupportedProtocols) -> Self {
        Self {
            supported,
            magic_received: false,
            application: None,
        }
    }

    pub fn handle(&mut self, message: ClientMessage) -> Result<ServerStep, NegotiationError> {
        if !self.magic_received && !matches!(message, ClientMessage::InitialMagic(_)) {
            return Err(NegotiationError::Unexpected(format!("{message:?} before magic")));
        }
        match message {
            ClientMessage::InitialMagic(magic) => {
                if magic != MAGIC {
                    return Err(NegotiationError::BadMagic(magic));
                }
                self.magic_received = true;
                Ok(ServerStep::Reply(ServerMessage::InitialMagic(MAGIC.to_string())))
            }
            ClientMessage::ApplicationProtocolRequest { category, versions } => {
                let local = &self.supported.application;
                let chosen = (category == local.category)
                    .then(|| select_version(&local.versions, &versions))
                    .flatten();
                match chosen {
                    Some(version) => {
                        self.application = Some(ApplicationProtocol::new(category.clone(), version));
                        Ok(ServerStep::Reply(ServerMessage::ApplicationProtocolResponse {
                            status: StatusCode::Success,
                            category,
                            version,
                        }))
                    }
                    None => {
                        let error = NegotiationError::NoCommonApplicationProtocol {
                            category: category.clone(),
                            local: local.versions.clone(),
                            remote: versions,
                        };
                        Ok(ServerStep::Abort(
                            ServerMessage::ApplicationProtocolResponse {
                                status: StatusCode::Failure,
                                category,
                                version: 0,
                            },
                            error,
                        ))
                    }
                }
            }
            ClientMessage::ModifierProtocolRequest {
                category,
                implementations,
            } => {
                let chosen = self
                    .supported
                    .modifier_category(&category)
                    .and_then(|local| select_implementation(&local.implementations, &implementations));
                let (status, implementation) = match chosen {
                    Some(implementation) => (StatusCode::Success, implementation),
                    None => (StatusCode::Failure, String::new()),
                };
                Ok(ServerStep::Reply(ServerMessage::ModifierProtocolResponse {
                    status,
                    category,
                    implementation,
                }))
            }
            ClientMessage::SwitchOverRequest {
                application,
                modifiers,
            } => {
                let agreed_application = self.application.as_ref() == Some(&application);
                let agreed_modifiers = modifiers.iter().all(|m| {
                    self.supported
                        .modifier_category(&m.category)
                        .is_some_and(|local| local.implementations.contains(&m.implementation))
                });
                if agreed_application && agreed_modifiers {
                    Ok(ServerStep::Finish(
                        ServerMessage::SwitchOverResponse {
                            status: StatusCode::Success,
                        },
                        ProtocolStack::new(application, modifiers),
                    ))
                } else {
                    Ok(ServerStep::Abort(
                        ServerMessage::SwitchOverResponse {
                            status: StatusCode::Failure,
                        },
                        NegotiationError::SwitchOverRefused,
                    ))
                }
            }
        }
    }
}

/// Run the server side of a handshake on a fresh connection
pub async fn accept<S>(supported: SupportedProtocols, stream: &mut S) -> Result<ProtocolStack, NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut server = HandshakeServer::new(supported);
    loop {
        let request = messages::receive_client(stream).await?;
        match server.handle(request)? {
            ServerStep::Reply(reply) => messages::send_server(stream, &reply).await?,
            ServerStep::Finish(reply, stack) => {
                messages::send_server(stream, &reply).await?;
                tracing::debug!(stack = %stack, "handshake accepted");
                return Ok(stack);
            }
            ServerStep::Abort(reply, error) => {
                messages::send_server(stream, &reply).await?;
                tracing::warn!(error = %error, "handshake refused");
                return Err(error);
            }
        }
    }
}
