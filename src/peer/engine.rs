use crate::error::{EngineError, MediaAccessError};
use crate::peer::media::LocalTrack;
use crate::peer::types::{ConnectivityState, Description, MediaKind, NetworkCandidate, RemoteTrackInfo};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// События транспортного движка
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CandidateDiscovered(NetworkCandidate),
    ConnectivityStateChanged(ConnectivityState),
    TrackReceived(RemoteTrackInfo),
}

/// Событие, помеченное поколением сессии, которая его породила
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: EngineEvent,
}

/// Канал, через который движок отдаёт события.
/// Отправка синхронная, порядок доставки сохраняется.
#[derive(Debug, Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// false, если получатель уже закрыт
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Примитивы согласования, которые предоставляет движок (ICE/DTLS/SRTP)
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), EngineError>;
    async fn create_offer(&self) -> Result<Description, EngineError>;
    async fn create_answer(&self) -> Result<Description, EngineError>;
    async fn set_local_description(&self, description: Description) -> Result<(), EngineError>;
    async fn set_remote_description(&self, description: Description) -> Result<(), EngineError>;
    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<(), EngineError>;
    /// Повторное закрытие не является ошибкой
    async fn close(&self) -> Result<(), EngineError>;
}

/// Создаёт по одному движку на сессию
#[async_trait]
pub trait TransportEngineFactory: Send + Sync {
    async fn create(&self, events: EventSender) -> Result<Arc<dyn TransportEngine>, EngineError>;
}

/// Источник локальных медиа-треков
#[async_trait]
pub trait MediaSourceProvider: Send + Sync {
    async fn acquire(&self, kinds: &[MediaKind]) -> Result<Vec<Arc<LocalTrack>>, MediaAccessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_tags_events_with_its_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = EventSender::new(7, tx);
        assert!(sender.send(EngineEvent::ConnectivityStateChanged(ConnectivityState::Checking)));
        assert!(sender.send(EngineEvent::CandidateDiscovered(NetworkCandidate::new("c1"))));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.generation, 7);
        assert_eq!(
            first.event,
            EngineEvent::ConnectivityStateChanged(ConnectivityState::Checking)
        );
        let second = rx.try_recv().unwrap();
        assert_eq!(
            second.event,
            EngineEvent::CandidateDiscovered(NetworkCandidate::new("c1"))
        );
    }

    #[test]
    fn send_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!EventSender::new(0, tx).send(EngineEvent::ConnectivityStateChanged(
            ConnectivityState::Closed
        )));
    }
}
