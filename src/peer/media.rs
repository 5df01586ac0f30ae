use crate::error::MediaAccessError;
use crate::peer::engine::MediaSourceProvider;
use crate::peer::types::MediaKind;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Локальный медиа-трек сессии
pub struct LocalTrack {
    id: String,
    stream_id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtc: Option<Arc<TrackLocalStaticSample>>,
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .field("rtc", &self.rtc.is_some())
            .finish()
    }
}

impl LocalTrack {
    /// Трек без привязки к движку (например, для тестов или внешнего захвата)
    pub fn detached(kind: MediaKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtc: None,
        }
    }

    pub fn with_rtc_track(kind: MediaKind, rtc: Arc<TrackLocalStaticSample>) -> Self {
        use webrtc::track::track_local::TrackLocal;
        Self {
            id: rtc.id().to_owned(),
            stream_id: rtc.stream_id().to_owned(),
            rtc: Some(rtc),
            ..Self::detached(kind, "", "")
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn rtc_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.rtc.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Stopped local {:?} track {}", self.kind, self.id);
        }
    }

    /// Пишет кадр от слоя захвата. Выключенный или остановленный трек кадры отбрасывает.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> Result<bool, webrtc::Error> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(false);
        }
        let Some(rtc) = &self.rtc else {
            return Ok(false);
        };
        rtc.write_sample(&Sample {
            data,
            duration,
            ..Default::default()
        })
        .await?;
        Ok(true)
    }
}

/// Отражает состояние mute / camera off поверх треков сессии.
/// Если треки одного типа расходятся по `enabled`, флаг показывает упрощённую картину.
#[derive(Debug, Default)]
pub struct MediaTrackController {
    tracks: Vec<Arc<LocalTrack>>,
    is_muted: bool,
    is_camera_off: bool,
}

impl MediaTrackController {
    pub fn attach(&mut self, tracks: Vec<Arc<LocalTrack>>) {
        self.is_muted = false;
        self.is_camera_off = false;
        for track in &tracks {
            track.set_enabled(true);
        }
        self.tracks = tracks;
    }

    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.tracks.clone()
    }

    pub fn has_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_camera_off(&self) -> bool {
        self.is_camera_off
    }

    /// Возвращает новое значение `is_muted`
    pub fn toggle_audio(&mut self) -> bool {
        if self.flip(MediaKind::Audio) {
            self.is_muted = !self.is_muted;
        }
        self.is_muted
    }

    /// Возвращает новое значение `is_camera_off`
    pub fn toggle_video(&mut self) -> bool {
        if self.flip(MediaKind::Video) {
            self.is_camera_off = !self.is_camera_off;
        }
        self.is_camera_off
    }

    fn flip(&self, kind: MediaKind) -> bool {
        if self.tracks.is_empty() {
            return false;
        }
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(!track.is_enabled());
        }
        true
    }

    /// Останавливает все треки и сбрасывает флаги
    pub fn release(&mut self) -> Vec<Arc<LocalTrack>> {
        for track in &self.tracks {
            track.stop();
        }
        self.is_muted = false;
        self.is_camera_off = false;
        std::mem::take(&mut self.tracks)
    }
}

/// Источник треков, в которые слой захвата пишет уже закодированные кадры
/// (Opus для звука, VP8 для видео).
#[derive(Debug, Default, Clone)]
pub struct SampleTrackSource;

impl SampleTrackSource {
    fn capability(kind: MediaKind) -> RTCRtpCodecCapability {
        match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl MediaSourceProvider for SampleTrackSource {
    async fn acquire(&self, kinds: &[MediaKind]) -> Result<Vec<Arc<LocalTrack>>, MediaAccessError> {
        if kinds.is_empty() {
            return Err(MediaAccessError::DeviceUnavailable(
                "no media kinds requested".into(),
            ));
        }
        let stream_id = format!("p2p-{}", random_id());
        let tracks: Vec<Arc<LocalTrack>> = kinds
            .iter()
            .map(|&kind| {
                let id = match kind {
                    MediaKind::Audio => "audio",
                    MediaKind::Video => "video",
                };
                let rtc = Arc::new(TrackLocalStaticSample::new(
                    Self::capability(kind),
                    id.to_owned(),
                    stream_id.clone(),
                ));
                Arc::new(LocalTrack::with_rtc_track(kind, rtc))
            })
            .collect();
        info!("Acquired {} local tracks on stream {}", tracks.len(), stream_id);
        Ok(tracks)
    }
}
