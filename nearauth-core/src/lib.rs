//! nearauth continuous proximity authentication.
//! Host-driven: the host hands in offer connections and channel factories; this crate opens no sockets.

pub mod authenticator;
pub mod availability;
pub mod channel;
pub mod config;
pub mod driver;
pub mod handshake;
pub mod identity;
pub mod offer;
pub mod pairing;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod wire;

mod notify;

pub use authenticator::{Authenticator, ConfirmError, LogNotifier, Notifier, OfferAction};
pub use availability::{AvailabilityEvent, AvailabilityTracker, AvailableLogin, LoginSummary};
pub use channel::{BoxedConnection, ChannelError, ChannelFactory, Connection, ProxyChannel};
pub use config::{Config, ConfigError};
pub use handshake::{AuthGrant, Handshake, HandshakeError, ReauthOutcome};
pub use identity::{Fingerprint, ServiceCommitment};
pub use notify::Subscription;
pub use offer::{Offer, OfferDecoder, OfferError};
pub use pairing::{MemoryPairingStore, Pairing, PairingError, PairingResolver, PairingStore, ResolvedOffer};
pub use policy::{Decision, DirectoryError, Mode, ModePolicy, SessionDirectory};
pub use protocol::{OfferKind, OfferPayload, ServiceAddress, PROTOCOL_VERSION};
pub use registry::SessionRegistry;
pub use scheduler::{DriverId, ReauthScheduler};
pub use session::{AuthToken, Session, SessionError, SessionId, SessionStatus};
pub use wire::{decode_frame, encode_frame, read_frame, write_frame, FrameDecodeError, FrameEncodeError};
