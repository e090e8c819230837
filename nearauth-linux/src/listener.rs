//! Offer listener: TCP accept loop, one offer per connection.

use std::sync::Arc;
use std::time::Duration;

use nearauth_core::{Authenticator, OfferAction};
use tokio::net::TcpListener;

/// A verifier gets this long to deliver its offer before the connection is dropped.
pub const OFFER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept verifiers forever. Only reading the offer is bounded by `read_timeout`.
pub async fn run_listener(
    listener: TcpListener,
    authenticator: Arc<Authenticator>,
    read_timeout: Duration,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let authenticator = authenticator.clone();
        tokio::spawn(async move {
            match authenticator.on_connection(stream, read_timeout).await {
                OfferAction::Authenticated(session) => {
                    tracing::info!(%peer, session = %session.id, status = ?session.status, "offer authenticated");
                }
                action => tracing::trace!(%peer, ?action, "offer handled"),
            }
        });
    }
}
