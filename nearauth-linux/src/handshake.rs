//! Shared-secret challenge/response handshake spoken with paired verifiers.
//!
//! Authentication: device sends `Hello`, verifier answers `Challenge`, device sends `Proof`,
//! verifier answers with a verdict. A reauthentication round is the same with `Reauth` in
//! place of `Hello`. Messages are bincode inside length-prefixed frames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nearauth_core::{
    AuthGrant, AuthToken, Handshake, HandshakeError, Pairing, ProxyChannel, ReauthOutcome, ServiceCommitment,
    Session,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pairings::FilePairingStore;

pub const NONCE_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMessage {
    Hello { commitment: Vec<u8> },
    Reauth { token: Option<Vec<u8>> },
    Proof { proof: [u8; 32] },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifierMessage {
    Challenge { nonce: [u8; NONCE_LEN] },
    Granted {
        token: Option<Vec<u8>>,
        next_interval_ms: u64,
    },
    Ended,
    Rejected { reason: String },
}

/// sha256("nearauth-proof-v1" || secret || nonce || commitment)
pub fn proof(secret: &[u8], nonce: &[u8; NONCE_LEN], commitment: &ServiceCommitment) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(b"nearauth-proof-v1");
    h.update(secret);
    h.update(nonce);
    h.update(commitment.as_bytes());
    h.finalize().into()
}

pub struct SharedSecretHandshake {
    pairings: Arc<FilePairingStore>,
}

impl SharedSecretHandshake {
    pub fn new(pairings: Arc<FilePairingStore>) -> Self {
        Self { pairings }
    }

    /// Send `opening`, answer the challenge, return the verdict.
    async fn challenge_round(
        &self,
        channel: &ProxyChannel,
        commitment: &ServiceCommitment,
        opening: DeviceMessage,
    ) -> Result<VerifierMessage, HandshakeError> {
        let secret = self
            .pairings
            .secret(commitment)
            .ok_or_else(|| HandshakeError::Rejected(format!("no secret for {}", commitment)))?;
        let nonce = match exchange(channel, &opening).await? {
            VerifierMessage::Challenge { nonce } => nonce,
            VerifierMessage::Rejected { reason } => return Err(HandshakeError::Rejected(reason)),
            other => return Err(unexpected(&other)),
        };
        exchange(
            channel,
            &DeviceMessage::Proof {
                proof: proof(secret, &nonce, commitment),
            },
        )
        .await
    }
}

#[async_trait]
impl Handshake for SharedSecretHandshake {
    async fn perform(&self, channel: &ProxyChannel, pairing: &Pairing) -> Result<AuthGrant, HandshakeError> {
        let hello = DeviceMessage::Hello {
            commitment: pairing.commitment.as_bytes().to_vec(),
        };
        match self.challenge_round(channel, &pairing.commitment, hello).await? {
            VerifierMessage::Granted { token, .. } => Ok(AuthGrant {
                token: token.map(AuthToken::new),
            }),
            VerifierMessage::Rejected { reason } => Err(HandshakeError::Rejected(reason)),
            other => Err(unexpected(&other)),
        }
    }

    async fn reauthenticate(
        &self,
        channel: &ProxyChannel,
        session: &Session,
    ) -> Result<ReauthOutcome, HandshakeError> {
        let reauth = DeviceMessage::Reauth {
            token: session.auth_token.as_ref().map(|t| t.as_bytes().to_vec()),
        };
        match self.challenge_round(channel, session.commitment(), reauth).await? {
            VerifierMessage::Granted {
                token,
                next_interval_ms,
            } => Ok(ReauthOutcome::Continue {
                next_interval: Duration::from_millis(next_interval_ms),
                token: token.map(AuthToken::new),
            }),
            VerifierMessage::Ended => Ok(ReauthOutcome::Ended),
            VerifierMessage::Rejected { reason } => Err(HandshakeError::Rejected(reason)),
            other => Err(unexpected(&other)),
        }
    }
}

async fn exchange(channel: &ProxyChannel, message: &DeviceMessage) -> Result<VerifierMessage, HandshakeError> {
    let request = bincode::serialize(message).map_err(|e| HandshakeError::Protocol(e.to_string()))?;
    let response = channel.request(&request).await?;
    bincode::deserialize(&response).map_err(|e| HandshakeError::Protocol(format!("bad verifier message: {e}")))
}

fn unexpected(message: &VerifierMessage) -> HandshakeError {
    HandshakeError::Protocol(format!("unexpected verifier message {:?}", message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearauth_core::wire::{read_frame, write_frame, MAX_FRAME_LEN};
    use nearauth_core::{SessionId, SessionStatus};
    use tokio::io::{duplex, DuplexStream};

    const FILE: &str = "[[pairing]]\nname = \"Desk\"\ncommitment = \"6465736b\"\nsecret = \"00112233\"";

    fn setup() -> (SharedSecretHandshake, ProxyChannel, DuplexStream, Pairing) {
        let store = Arc::new(FilePairingStore::parse(FILE).unwrap());
        let (near, far) = duplex(4096);
        let channel = ProxyChannel::new(Box::new(near), Duration::from_secs(5));
        let pairing = Pairing::new(ServiceCommitment::from_bytes(b"desk".to_vec()), "Desk");
        (SharedSecretHandshake::new(store), channel, far, pairing)
    }

    async fn recv(peer: &mut DuplexStream) -> DeviceMessage {
        bincode::deserialize(&read_frame(peer, MAX_FRAME_LEN).await.unwrap()).unwrap()
    }

    async fn send(peer: &mut DuplexStream, message: VerifierMessage) {
        write_frame(peer, &bincode::serialize(&message).unwrap()).await.unwrap();
    }

    /// Verifier side: challenge, check the proof, answer with `verdict` when it matches.
    async fn verify(peer: &mut DuplexStream, verdict: VerifierMessage) -> DeviceMessage {
        let opening = recv(peer).await;
        let nonce = [7u8; NONCE_LEN];
        send(peer, VerifierMessage::Challenge { nonce }).await;
        let expected = proof(&[0x00, 0x11, 0x22, 0x33], &nonce, &ServiceCommitment::from_bytes(b"desk".to_vec()));
        match recv(peer).await {
            DeviceMessage::Proof { proof } if proof == expected => send(peer, verdict).await,
            _ => {
                send(
                    peer,
                    VerifierMessage::Rejected {
                        reason: "bad proof".into(),
                    },
                )
                .await
            }
        }
        opening
    }

    #[tokio::test]
    async fn perform_grants_token() {
        let (hs, channel, mut peer, pairing) = setup();
        let verifier = tokio::spawn(async move {
            let opening = verify(
                &mut peer,
                VerifierMessage::Granted {
                    token: Some(b"tok".to_vec()),
                    next_interval_ms: 30_000,
                },
            )
            .await;
            (opening, peer)
        });
        let grant = hs.perform(&channel, &pairing).await.unwrap();
        assert_eq!(grant.token, Some(AuthToken::new(b"tok".to_vec())));
        let (opening, _peer) = verifier.await.unwrap();
        assert_eq!(
            opening,
            DeviceMessage::Hello {
                commitment: b"desk".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn reauth_reports_interval_and_end() {
        let (hs, channel, mut peer, pairing) = setup();
        let session = Session {
            id: SessionId::new(),
            pairing,
            status: SessionStatus::Active,
            last_auth: None,
            auth_token: Some(AuthToken::new(b"tok".to_vec())),
            error: None,
        };
        let verifier = tokio::spawn(async move {
            let opening = verify(
                &mut peer,
                VerifierMessage::Granted {
                    token: None,
                    next_interval_ms: 15_000,
                },
            )
            .await;
            assert_eq!(
                opening,
                DeviceMessage::Reauth {
                    token: Some(b"tok".to_vec())
                }
            );
            verify(&mut peer, VerifierMessage::Ended).await;
            peer
        });
        assert_eq!(
            hs.reauthenticate(&channel, &session).await.unwrap(),
            ReauthOutcome::Continue {
                next_interval: Duration::from_millis(15_000),
                token: None
            }
        );
        assert_eq!(
            hs.reauthenticate(&channel, &session).await.unwrap(),
            ReauthOutcome::Ended
        );
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let store = Arc::new(
            FilePairingStore::parse("[[pairing]]\nname = \"Desk\"\ncommitment = \"6465736b\"\nsecret = \"ffff\"")
                .unwrap(),
        );
        let hs = SharedSecretHandshake::new(store);
        let (near, mut peer) = duplex(4096);
        let channel = ProxyChannel::new(Box::new(near), Duration::from_secs(5));
        let pairing = Pairing::new(ServiceCommitment::from_bytes(b"desk".to_vec()), "Desk");
        let verifier = tokio::spawn(async move {
            verify(
                &mut peer,
                VerifierMessage::Granted {
                    token: None,
                    next_interval_ms: 1,
                },
            )
            .await;
            peer
        });
        assert!(matches!(
            hs.perform(&channel, &pairing).await,
            Err(HandshakeError::Rejected(reason)) if reason == "bad proof"
        ));
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn garbage_reply_is_protocol_error() {
        let (hs, channel, mut peer, pairing) = setup();
        let verifier = tokio::spawn(async move {
            let _ = read_frame(&mut peer, MAX_FRAME_LEN).await;
            write_frame(&mut peer, b"\xff\xff\xff\xff\xff").await.unwrap();
            peer
        });
        assert!(matches!(
            hs.perform(&channel, &pairing).await,
            Err(HandshakeError::Protocol(_))
        ));
        verifier.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_service_has_no_secret() {
        let (hs, channel, _peer, _) = setup();
        let stranger = Pairing::new(ServiceCommitment::from_bytes(b"gate".to_vec()), "Gate");
        assert!(matches!(
            hs.perform(&channel, &stranger).await,
            Err(HandshakeError::Rejected(_))
        ));
    }
}
