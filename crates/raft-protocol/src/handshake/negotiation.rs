//! # negotiation
//!
//! why: both handshake drivers and the tests must agree on one set of rules
//! relations: server.rs answers requests with these choices; client.rs only
//! reports what the server picked
//! what: select_version, select_implementation, negotiate

use super::protocols::{ApplicationProtocol, ModifierProtocol, ProtocolStack, SupportedProtocols};
use crate::error::NegotiationError;

/// Highest version both sides list
pub fn select_version(local: &[u32], remote: &[u32]) -> Option<u32> {
    local.iter().filter(|v| remote.contains(v)).max().copied()
}

/// First of the responder's preferences the requester offered
pub fn select_implementation(responder: &[String], requested: &[String]) -> Option<String> {
    responder.iter().find(|i| requested.contains(i)).cloned()
}

/// Agree on a stack between an initiator and a responder.
///
/// The application protocol is mandatory. Modifier categories are settled
/// one at a time in the initiator's order; a category without a common
/// implementation is left out.
pub fn negotiate(
    initiator: &SupportedProtocols,
    responder: &SupportedProtocols,
) -> Result<ProtocolStack, NegotiationError> {
    let category = &initiator.application.category;
    let version = (category == &responder.application.category)
        .then(|| select_version(&responder.application.versions, &initiator.application.versions))
        .flatten()
        .ok_or_else(|| NegotiationError::NoCommonApplicationProtocol {
            category: category.clone(),
            local: initiator.application.versions.clone(),
            remote: responder.application.versions.clone(),
        })?;

    let modifiers = initiator
        .modifiers
        .iter()
        .filter_map(|wanted| {
            let offered = responder.modifier_category(&wanted.category)?;
            let implementation = select_implementation(&offered.implementations, &wanted.implementations)?;
            Some(ModifierProtocol::new(wanted.category.clone(), implementation))
        })
        .collect();

    Ok(ProtocolStack::new(
        ApplicationProtocol::new(category.clone(), version),
        modifiers,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::protocols::{
        SupportedApplicationProtocol, SupportedModifierProtocol, COMPRESSION_CATEGORY, RAFT_CATEGORY,
    };

    fn supported(versions: &[u32], compression: &[&str]) -> SupportedProtocols {
        let modifiers = if compression.is_empty() {
            vec![]
        } else {
            vec![SupportedModifierProtocol {
                category: COMPRESSION_CATEGORY.into(),
                implementations: compression.iter().map(|s| s.to_string()).collect(),
            }]
        };
        SupportedProtocols {
            application: SupportedApplicationProtocol {
                category: RAFT_CATEGORY.into(),
                versions: versions.to_vec(),
            },
            modifiers,
        }
    }

    #[test]
    fn picks_highest_common_version() {
        assert_eq!(select_version(&[1, 2, 3], &[2, 3, 4]), Some(3));
        assert_eq!(select_version(&[1], &[2]), None);
    }

    #[test]
    fn responder_preference_wins() {
        let responder = vec!["LZ4".to_string(), "Snappy".to_string()];
        let requested = vec!["Snappy".to_string(), "LZ4".to_string()];
        assert_eq!(select_implementation(&responder, &requested), Some("LZ4".into()));
    }

    #[test]
    fn stack_carries_version_and_modifier() {
        let stack = negotiate(&supported(&[1, 2], &["Snappy"]), &supported(&[1], &["LZ4", "Snappy"])).unwrap();
        assert_eq!(stack.application, ApplicationProtocol::raft(1));
        assert_eq!(stack.modifiers, vec![ModifierProtocol::new(COMPRESSION_CATEGORY, "Snappy")]);
    }

    #[test]
    fn missing_modifier_is_omitted() {
        let stack = negotiate(&supported(&[1], &["Snappy"]), &supported(&[1], &["LZ4"])).unwrap();
        assert!(stack.modifiers.is_empty());
    }

    #[test]
    fn missing_application_protocol_fails() {
        let err = negotiate(&supported(&[2], &[]), &supported(&[1], &[])).unwrap_err();
        assert!(matches!(err, NegotiationError::NoCommonApplicationProtocol { .. }));
    }
}
