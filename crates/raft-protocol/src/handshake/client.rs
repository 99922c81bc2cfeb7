//! Initiating side of the handshake.

use super::messages::{self, ClientMessage, ServerMessage, StatusCode, MAGIC};
use super::protocols::{ApplicationProtocol, ModifierProtocol, ProtocolStack, SupportedProtocols};
use crate::error::NegotiationError;
use tokio::io::{AsyncRead, AsyncWrite};

/// Run the client side of a handshake: magic, application protocol, one
/// request per modifier category, then switch over.
pub async fn initiate<S>(supported: &SupportedProtocols, stream: &mut S) -> Result<ProtocolStack, NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    messages::send_client(stream, &ClientMessage::InitialMagic(MAGIC.to_string())).await?;
    match messages::receive_server(stream).await? {
        ServerMessage::InitialMagic(magic) if magic == MAGIC => {}
        ServerMessage::InitialMagic(magic) => return Err(NegotiationError::BadMagic(magic)),
        other => return Err(NegotiationError::Unexpected(format!("{other:?}"))),
    }

    let wanted = &supported.application;
    messages::send_client(
        stream,
        &ClientMessage::ApplicationProtocolRequest {
            category: wanted.category.clone(),
            versions: wanted.versions.clone(),
        },
    )
    .await?;
    let application = match messages::receive_server(stream).await? {
        ServerMessage::ApplicationProtocolResponse {
            status: StatusCode::Success,
            category,
            version,
        } if category == wanted.category && wanted.versions.contains(&version) => {
            ApplicationProtocol::new(category, version)
        }
        ServerMessage::ApplicationProtocolResponse { category, .. } => {
            return Err(NegotiationError::Refused(category))
        }
        other => return Err(NegotiationError::Unexpected(format!("{other:?}"))),
    };

    let mut modifiers = Vec::new();
    for offer in &supported.modifiers {
        messages::send_client(
            stream,
            &ClientMessage::ModifierProtocolRequest {
                category: offer.category.clone(),
                implementations: offer.implementations.clone(),
            },
        )
        .await?;
        match messages::receive_server(stream).await? {
            ServerMessage::ModifierProtocolResponse {
                status: StatusCode::Success,
                category,
                implementation,
            } if category == offer.category && offer.implementations.contains(&implementation) => {
                modifiers.push(ModifierProtocol::new(category, implementation));
            }
            ServerMessage::ModifierProtocolResponse { category, .. } => {
                tracing::debug!(category = %category, "no common modifier, continuing without");
            }
            other => return Err(NegotiationError::Unexpected(format!("{other:?}"))),
        }
    }

    let stack = ProtocolStack::new(application, modifiers);
    messages::send_client(
        stream,
        &ClientMessage::SwitchOverRequest {
            application: stack.application.clone(),
            modifiers: stack.modifiers.clone(),
        },
    )
    .await?;
    match messages::receive_server(stream).await? {
        ServerMessage::SwitchOverResponse {
            status: StatusCode::Success,
        } => {
            tracing::debug!(stack = %stack, "handshake complete");
            Ok(stack)
        }
        ServerMessage::SwitchOverResponse { .. } => Err(NegotiationError::SwitchOverRefused),
        other => Err(NegotiationError::Unexpected(format!("{other:?}"))),
    }
}
