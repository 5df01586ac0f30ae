//! Общие помощники для тестов контроллера: скриптовый движок и источник
//! медиа с треками без RTP-привязки.

#![allow(dead_code)]

use async_trait::async_trait;
use p2p_call_lib::error::{EngineError, MediaAccessError};
use p2p_call_lib::peer::engine::{
    EngineEvent, EventSender, MediaSourceProvider, TransportEngine, TransportEngineFactory,
};
use p2p_call_lib::peer::media::LocalTrack;
use p2p_call_lib::peer::types::{
    ConnectivityState, Description, MediaKind, NetworkCandidate, Role, SessionBundle,
};
use p2p_call_lib::{encode, PeerSessionController};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Журнал вызовов, общий для всех движков фабрики
#[derive(Debug, Default)]
pub struct EngineLog {
    pub calls: Vec<String>,
    pub senders: Vec<EventSender>,
    pub remote_candidates: Vec<String>,
    pub closed: usize,
}

#[derive(Clone, Default)]
pub struct FakeEngineFactory {
    log: Arc<Mutex<EngineLog>>,
    fail_on: Option<&'static str>,
    rejected: Vec<String>,
    offer_gate: Option<Arc<Notify>>,
}

impl FakeEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Указанный примитив возвращает ошибку
    pub fn failing_on(mut self, primitive: &'static str) -> Self {
        self.fail_on = Some(primitive);
        self
    }

    /// `add_candidate` отклоняет этого кандидата
    pub fn rejecting(mut self, candidate: &str) -> Self {
        self.rejected.push(candidate.to_owned());
        self
    }

    /// `create_offer` ждёт, пока не откроют шлюз
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.offer_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }

    pub fn engines_created(&self) -> usize {
        self.log.lock().unwrap().senders.len()
    }

    pub fn remote_candidates(&self) -> Vec<String> {
        self.log.lock().unwrap().remote_candidates.clone()
    }

    /// Событие от последнего созданного движка
    pub fn emit(&self, event: EngineEvent) -> bool {
        let sender = self.log.lock().unwrap().senders.last().cloned();
        sender.is_some_and(|s| s.send(event))
    }

    /// Событие от движка с номером `index`
    pub fn emit_from(&self, index: usize, event: EngineEvent) -> bool {
        let sender = self.log.lock().unwrap().senders.get(index).cloned();
        sender.is_some_and(|s| s.send(event))
    }

    /// Уступает планировщику, пока примитив не будет вызван
    pub async fn wait_for_call(&self, primitive: &str) {
        while !self.calls().iter().any(|c| c == primitive) {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl TransportEngineFactory for FakeEngineFactory {
    async fn create(&self, events: EventSender) -> Result<Arc<dyn TransportEngine>, EngineError> {
        if self.fail_on == Some("create") {
            return Err(EngineError::other("engine unavailable"));
        }
        self.log.lock().unwrap().senders.push(events);
        Ok(Arc::new(FakeEngine {
            log: self.log.clone(),
            fail_on: self.fail_on,
            rejected: self.rejected.clone(),
            offer_gate: self.offer_gate.clone(),
        }))
    }
}

struct FakeEngine {
    log: Arc<Mutex<EngineLog>>,
    fail_on: Option<&'static str>,
    rejected: Vec<String>,
    offer_gate: Option<Arc<Notify>>,
}

impl FakeEngine {
    fn record(&self, primitive: &str) -> Result<(), EngineError> {
        self.log.lock().unwrap().calls.push(primitive.to_owned());
        if self.fail_on == Some(primitive) {
            return Err(EngineError::other(format!("{primitive} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportEngine for FakeEngine {
    async fn add_track(&self, _track: Arc<LocalTrack>) -> Result<(), EngineError> {
        self.record("add_track")
    }

    async fn create_offer(&self) -> Result<Description, EngineError> {
        self.record("create_offer")?;
        if let Some(gate) = &self.offer_gate {
            gate.notified().await;
        }
        Ok(sdp("offer"))
    }

    async fn create_answer(&self) -> Result<Description, EngineError> {
        self.record("create_answer")?;
        Ok(sdp("answer"))
    }

    async fn set_local_description(&self, _description: Description) -> Result<(), EngineError> {
        self.record("set_local_description")
    }

    async fn set_remote_description(&self, _description: Description) -> Result<(), EngineError> {
        self.record("set_remote_description")
    }

    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<(), EngineError> {
        self.record("add_candidate")?;
        if self.rejected.contains(&candidate.candidate) {
            return Err(EngineError::other("malformed candidate"));
        }
        self.log
            .lock()
            .unwrap()
            .remote_candidates
            .push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Выдаёт треки или отказывает, как при запрете доступа
#[derive(Default)]
pub struct FakeMediaSource {
    pub denied: bool,
}

#[async_trait]
impl MediaSourceProvider for FakeMediaSource {
    async fn acquire(&self, kinds: &[MediaKind]) -> Result<Vec<Arc<LocalTrack>>, MediaAccessError> {
        if self.denied {
            return Err(MediaAccessError::PermissionDenied("camera blocked".into()));
        }
        Ok(kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| Arc::new(LocalTrack::detached(*kind, format!("track-{i}"), "stream")))
            .collect())
    }
}

pub fn controller(engines: &FakeEngineFactory) -> Arc<PeerSessionController> {
    controller_with_media(engines, FakeMediaSource::default())
}

pub fn controller_with_media(
    engines: &FakeEngineFactory,
    media: FakeMediaSource,
) -> Arc<PeerSessionController> {
    Arc::new(PeerSessionController::new(
        Arc::new(engines.clone()),
        Arc::new(media),
        vec![MediaKind::Audio, MediaKind::Video],
    ))
}

pub fn sdp(kind: &str) -> Description {
    Description::new(json!({ "type": kind, "sdp": format!("v=0\r\ns=fake-{kind}\r\n") }))
}

pub fn candidate(n: u32) -> NetworkCandidate {
    NetworkCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// Код, который опубликовала бы удалённая сторона
pub fn remote_code(role: Role, candidates: Vec<NetworkCandidate>) -> String {
    let kind = match role {
        Role::Offer => "offer",
        Role::Answer => "answer",
    };
    encode(&SessionBundle {
        role,
        description: sdp(kind),
        candidates,
    })
    .unwrap()
}

pub fn connected() -> EngineEvent {
    EngineEvent::ConnectivityStateChanged(ConnectivityState::Connected)
}
