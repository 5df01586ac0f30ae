use crate::config::Config;
use crate::error::EngineError;
use crate::peer::engine::{EngineEvent, EventSender, TransportEngine, TransportEngineFactory};
use crate::peer::media::LocalTrack;
use crate::peer::types::{
    ConnectivityState, Description, MediaKind, NetworkCandidate, RemoteTrackInfo, ServerConfig,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

/// Создаёт webrtc-rs peer connection на каждую сессию.
/// Список ICE серверов общий: изменения применяются к следующей сессии.
#[derive(Debug, Clone)]
pub struct WebrtcEngineFactory {
    ice_servers: Arc<RwLock<Vec<ServerConfig>>>,
}

impl WebrtcEngineFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            ice_servers: Arc::new(RwLock::new(config.ice_servers.clone())),
        }
    }

    pub fn ice_servers_handle(&self) -> Arc<RwLock<Vec<ServerConfig>>> {
        self.ice_servers.clone()
    }
}

#[async_trait]
impl TransportEngineFactory for WebrtcEngineFactory {
    async fn create(&self, events: EventSender) -> Result<Arc<dyn TransportEngine>, EngineError> {
        let servers = self
            .ice_servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let engine = WebrtcEngine::new(&servers, events).await?;
        Ok(Arc::new(engine))
    }
}

/// Transport Engine поверх `RTCPeerConnection`
pub struct WebrtcEngine {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl WebrtcEngine {
    /// создаём Peer и подписываемся на события; события уходят в канал без spawn, чтобы не терять порядок
    pub async fn new(servers: &[ServerConfig], events: EventSender) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);
        debug!(
            "Created peer connection for generation {}",
            events.generation()
        );

        // Обработчик для сбора локальных кандидатов
        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        candidate_events.send(EngineEvent::CandidateDiscovered(NetworkCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                },
                // cand == None означает конец сбора
                None => debug!("ICE candidate gathering completed (null candidate received)"),
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            trace!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        let state_events = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
            debug!("ICE connection state changed to: {:?}", st);
            if let Some(state) = connectivity_from(st) {
                state_events.send(EngineEvent::ConnectivityStateChanged(state));
            }
            Box::pin(async {})
        }));

        let track_events = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            match media_kind_from(track.kind()) {
                Some(kind) => {
                    track_events.send(EngineEvent::TrackReceived(RemoteTrackInfo {
                        id: track.id().to_string(),
                        kind,
                    }));
                }
                None => debug!("Ignoring remote track of unspecified kind"),
            }
            Box::pin(async {})
        }));

        Ok(Self {
            pc,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl TransportEngine for WebrtcEngine {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), EngineError> {
        let Some(rtc) = track.rtc_track() else {
            debug!("Local track {} has no RTP binding, skipping", track.id());
            return Ok(());
        };
        let sender = self
            .pc
            .add_track(rtc as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP нужно вычитывать, иначе перехватчики (NACK и т.п.) не работают
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        debug!("Added local {:?} track {}", track.kind(), track.id());
        Ok(())
    }

    async fn create_offer(&self) -> Result<Description, EngineError> {
        let offer = self.pc.create_offer(None).await?;
        to_description(&offer)
    }

    async fn create_answer(&self) -> Result<Description, EngineError> {
        let answer = self.pc.create_answer(None).await?;
        to_description(&answer)
    }

    async fn set_local_description(&self, description: Description) -> Result<(), EngineError> {
        self.pc
            .set_local_description(from_description(description)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: Description) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(from_description(description)?)
            .await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing peer connection");
        self.pc.close().await?;
        Ok(())
    }
}

fn to_description(desc: &RTCSessionDescription) -> Result<Description, EngineError> {
    Ok(Description::new(serde_json::to_value(desc)?))
}

fn from_description(desc: Description) -> Result<RTCSessionDescription, EngineError> {
    Ok(serde_json::from_value(desc.into_json())?)
}

fn connectivity_from(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityState::New),
        RTCIceConnectionState::Checking => Some(ConnectivityState::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(ConnectivityState::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

fn media_kind_from(kind: RTPCodecType) -> Option<MediaKind> {
    match kind {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        _ => None,
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::engine::MediaSourceProvider;
    use crate::peer::media::SampleTrackSource;
    use tokio::sync::mpsc;

    #[test]
    fn ice_states_map_to_connectivity() {
        assert_eq!(
            connectivity_from(RTCIceConnectionState::Completed),
            Some(ConnectivityState::Connected)
        );
        assert_eq!(
            connectivity_from(RTCIceConnectionState::Failed),
            Some(ConnectivityState::Failed)
        );
        assert_eq!(connectivity_from(RTCIceConnectionState::Unspecified), None);
    }

    #[test]
    fn servers_get_schemes_and_credentials() {
        let servers = vec![ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("alice".into()),
            credential: Some("secret".into()),
        }];
        let ice = ice_servers(&servers);
        assert_eq!(ice[0].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(ice[0].username, "alice");
        assert_eq!(ice[0].credential, "secret");
    }

    #[tokio::test]
    async fn engine_creates_offer_and_closes_twice() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = WebrtcEngineFactory::new(&Config::default())
            .create(EventSender::new(0, tx))
            .await
            .unwrap();

        for track in SampleTrackSource
            .acquire(&[MediaKind::Audio, MediaKind::Video])
            .await
            .unwrap()
        {
            engine.add_track(track).await.unwrap();
        }

        let offer = engine.create_offer().await.unwrap();
        assert_eq!(offer.as_json()["type"], "offer");
        assert!(offer.as_json()["sdp"].as_str().unwrap().contains("m=audio"));

        engine.close().await.unwrap();
        engine.close().await.unwrap();
    }
}
