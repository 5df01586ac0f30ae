pub mod codec;
pub mod connection;
pub mod engine;
pub mod media;
pub mod state;
pub mod types;

pub use engine::{
    EngineEvent, EventSender, MediaSourceProvider, TaggedEvent, TransportEngine,
    TransportEngineFactory,
};
pub use media::{LocalTrack, MediaTrackController, SampleTrackSource};
pub use state::{PeerSession, SignalingStateMachine};
pub use types::{
    ConnectivityState, Description, DrainReport, MediaKind, NetworkCandidate, Phase,
    RemoteTrackInfo, Role, ServerConfig, SessionBundle, SessionHandle, SessionSnapshot,
};
