//! PeerSessionController: команды над одной сессией согласования.
//!
//! Состояние лежит под обычным мьютексом, который не держится через await.
//! После каждой точки ожидания (примитив движка, захват медиа) поколение
//! сверяется заново: результаты, пришедшие после `terminate()`, отбрасываются.

use crate::config::Config;
use crate::error::{CallError, EngineError, InvalidCodeError, MediaAccessError};
use crate::peer::codec;
use crate::peer::connection::WebrtcEngineFactory;
use crate::peer::engine::{
    EngineEvent, EventSender, MediaSourceProvider, TaggedEvent, TransportEngine,
    TransportEngineFactory,
};
use crate::peer::media::{LocalTrack, MediaTrackController, SampleTrackSource};
use crate::peer::state::SignalingStateMachine;
use crate::peer::types::{
    ConnectivityState, DrainReport, MediaKind, NetworkCandidate, Phase, Role, SessionBundle,
    SessionHandle, SessionSnapshot,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

struct Inner {
    machine: SignalingStateMachine,
    engine: Option<Arc<dyn TransportEngine>>,
    media: MediaTrackController,
    /// Поколение, в котором выполняется команда
    busy: Option<u64>,
    last_error: Option<String>,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        let session = self.machine.session();
        let published_code = self.machine.published_code().map(str::to_owned);
        SessionSnapshot {
            phase: self.machine.phase(),
            role: self.machine.role(),
            code_fingerprint: published_code.as_deref().map(codec::fingerprint),
            published_code,
            published_at: session.and_then(|s| s.published_at()),
            connectivity_status: self.machine.status(),
            remote_track_available: session.is_some_and(|s| s.remote_track_available()),
            local_media_ready: self.media.has_tracks(),
            is_muted: self.media.is_muted(),
            is_camera_off: self.media.is_camera_off(),
            busy: self.busy.is_some(),
            error: self.last_error.clone(),
        }
    }
}

/// Снимает флаг занятости при любом выходе из команды.
/// После terminate() флаг принадлежит уже новому поколению и не трогается.
struct BusyGuard<'a> {
    controller: &'a PeerSessionController,
    generation: u64,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.controller.update(|inner| {
            if inner.busy == Some(generation) {
                inner.busy = None;
            }
        });
    }
}

pub struct PeerSessionController {
    engines: Arc<dyn TransportEngineFactory>,
    media_source: Arc<dyn MediaSourceProvider>,
    media_kinds: Vec<MediaKind>,
    inner: Mutex<Inner>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TaggedEvent>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl PeerSessionController {
    pub fn new(
        engines: Arc<dyn TransportEngineFactory>,
        media_source: Arc<dyn MediaSourceProvider>,
        media_kinds: Vec<MediaKind>,
    ) -> Self {
        let inner = Inner {
            machine: SignalingStateMachine::new(),
            engine: None,
            media: MediaTrackController::default(),
            busy: None,
            last_error: None,
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(inner.snapshot());
        Self {
            engines,
            media_source,
            media_kinds,
            inner: Mutex::new(inner),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            snapshot_tx,
        }
    }

    /// webrtc-rs движок и треки, в которые пишет внешний слой захвата
    pub fn with_config(config: &Config) -> Self {
        Self::new(
            Arc::new(WebrtcEngineFactory::new(config)),
            Arc::new(SampleTrackSource),
            config.media_kinds.clone(),
        )
    }

    // ========== SNAPSHOT ==========

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.lock().machine.generation()
    }

    pub fn local_candidates(&self) -> Vec<NetworkCandidate> {
        self.lock().machine.local_candidates().to_vec()
    }

    pub fn local_tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.lock().media.tracks()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Мутация состояния + уведомление подписчиков, если снимок изменился
    /// Снимок публикуется под тем же локом, иначе старый снимок может перетереть новый
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.lock();
        let result = f(&mut inner);
        let snapshot = inner.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }

    fn begin(&self) -> Result<BusyGuard<'_>, CallError> {
        let generation = self.update(|inner| {
            if inner.busy.is_some() {
                return Err(CallError::Busy);
            }
            let generation = inner.machine.generation();
            inner.busy = Some(generation);
            inner.last_error = None;
            Ok(generation)
        })?;
        Ok(BusyGuard {
            controller: self,
            generation,
        })
    }

    fn report(&self, err: &CallError) {
        warn!("{}", err);
        self.update(|inner| inner.last_error = Some(err.user_message().to_owned()));
    }

    /// Прерванная через terminate() команда ошибку в снимок не пишет
    fn finish<T>(&self, result: Result<T, CallError>) -> Result<T, CallError> {
        match &result {
            Err(CallError::Terminated) => debug!("Command abandoned: session terminated"),
            Err(err) => self.report(err),
            Ok(_) => {}
        }
        result
    }

    // ========== EVENTS ==========

    /// Применяет событие движка в порядке поступления
    pub fn handle_event(&self, tagged: TaggedEvent) -> bool {
        let failed = matches!(
            tagged.event,
            EngineEvent::ConnectivityStateChanged(ConnectivityState::Failed)
        );
        let applied = self.update(|inner| inner.machine.apply(tagged));
        if applied && failed {
            self.report(&CallError::Connection(
                "transport reported failed connectivity".into(),
            ));
        }
        applied
    }

    /// Цикл обработки событий; работает, пока жив контроллер
    pub async fn run(&self) {
        let mut rx = self.events_rx.lock().await;
        while let Some(tagged) = rx.recv().await {
            self.handle_event(tagged);
        }
    }

    /// Применяет все события, уже лежащие в очереди. Возвращает число применённых.
    pub fn drain_events(&self) -> usize {
        let Ok(mut rx) = self.events_rx.try_lock() else {
            return 0;
        };
        let mut applied = 0;
        while let Ok(tagged) = rx.try_recv() {
            if self.handle_event(tagged) {
                applied += 1;
            }
        }
        applied
    }

    // ========== COMMANDS ==========

    /// Получает локальные треки у источника медиа
    pub async fn start_local_media(&self) -> Result<(), CallError> {
        let _busy = self.begin()?;
        let result = self.acquire_media().await;
        self.finish(result)
    }

    /// A-сторона: создаём OFFER
    pub async fn start_as_caller(&self) -> Result<SessionHandle, CallError> {
        let _busy = self.begin()?;
        let result = self.open_caller().await;
        self.finish(result)
    }

    /// B-сторона: принимаем OFFER, создаём ANSWER
    pub async fn join_as_callee(&self, remote_code: &str) -> Result<SessionHandle, CallError> {
        let _busy = self.begin()?;
        let result = self.open_callee(remote_code).await;
        self.finish(result)
    }

    /// A-сторона: применяем ANSWER
    pub async fn complete_as_caller(&self, remote_code: &str) -> Result<DrainReport, CallError> {
        let _busy = self.begin()?;
        let result = self.apply_answer(remote_code).await;
        self.finish(result)
    }

    /// Возвращает новое значение `is_muted`
    pub fn toggle_audio(&self) -> bool {
        self.update(|inner| inner.media.toggle_audio())
    }

    /// Возвращает новое значение `is_camera_off`
    pub fn toggle_video(&self) -> bool {
        self.update(|inner| inner.media.toggle_video())
    }

    /// Завершает сессию из любой фазы. Повторный вызов безопасен.
    pub async fn terminate(&self) {
        let (engine, tracks) = self.update(|inner| {
            inner.machine.terminate();
            inner.busy = None;
            inner.last_error = None;
            (inner.engine.take(), inner.media.release())
        });
        info!("Session terminated, stopped {} local tracks", tracks.len());
        if let Some(engine) = engine {
            if let Err(e) = engine.close().await {
                warn!("Failed to close transport engine: {}", e);
            }
        }
    }

    // ========== INTERNALS ==========

    async fn acquire_media(&self) -> Result<(), CallError> {
        let generation = {
            let inner = self.lock();
            if inner.media.has_tracks() {
                debug!("Local media already started");
                return Ok(());
            }
            inner.machine.generation()
        };

        let tracks = self.media_source.acquire(&self.media_kinds).await?;

        self.update(|inner| {
            if inner.machine.generation() != generation {
                for track in &tracks {
                    track.stop();
                }
                return Err(CallError::Terminated);
            }
            inner.media.attach(tracks);
            Ok(())
        })
    }

    async fn open_caller(&self) -> Result<SessionHandle, CallError> {
        let (generation, tracks) = self.assign_role(Role::Offer)?;
        let engine = self.open_engine(generation, tracks).await?;

        let offer = engine.create_offer().await;
        let offer = self.settle(generation, offer, "create offer")?;
        self.update(|inner| inner.machine.description_created(generation));

        let set = engine.set_local_description(offer.clone()).await;
        self.settle(generation, set, "set local description")?;
        self.update(|inner| inner.machine.local_description_set(generation, offer));

        info!("Offer published (generation {})", generation);
        Ok(SessionHandle {
            role: Role::Offer,
            generation,
            drain: DrainReport::default(),
        })
    }

    async fn open_callee(&self, remote_code: &str) -> Result<SessionHandle, CallError> {
        let bundle = decode_expecting(remote_code, Role::Offer)?;
        let (generation, tracks) = self.assign_role(Role::Answer)?;
        let engine = self.open_engine(generation, tracks).await?;

        let set = engine.set_remote_description(bundle.description).await;
        self.settle(generation, set, "set remote description")?;
        self.update(|inner| inner.machine.remote_description_applied(generation));

        let drain = self
            .drain_candidates(generation, engine.as_ref(), bundle.candidates)
            .await?;

        let answer = engine.create_answer().await;
        let answer = self.settle(generation, answer, "create answer")?;
        self.update(|inner| inner.machine.description_created(generation));

        let set = engine.set_local_description(answer.clone()).await;
        self.settle(generation, set, "set local description")?;
        self.update(|inner| inner.machine.local_description_set(generation, answer));

        info!("Answer published (generation {})", generation);
        Ok(SessionHandle {
            role: Role::Answer,
            generation,
            drain,
        })
    }

    async fn apply_answer(&self, remote_code: &str) -> Result<DrainReport, CallError> {
        let (generation, engine) = {
            let inner = self.lock();
            let phase = inner.machine.phase();
            if phase != Phase::AwaitingRemoteCompletion {
                return Err(CallError::WrongPhase {
                    expected: Phase::AwaitingRemoteCompletion,
                    actual: phase,
                });
            }
            if inner.machine.session().is_some_and(|s| s.remote_applied()) {
                return Err(CallError::AlreadyCompleted);
            }
            let engine = inner
                .engine
                .clone()
                .ok_or_else(|| CallError::negotiation("no transport engine for session"))?;
            (inner.machine.generation(), engine)
        };

        // Ошибка в коде не рушит сессию: пользователь может вставить код ещё раз
        let bundle = decode_expecting(remote_code, Role::Answer)?;

        let set = engine.set_remote_description(bundle.description).await;
        self.settle(generation, set, "set remote description")?;
        self.update(|inner| inner.machine.remote_description_applied(generation));

        self.drain_candidates(generation, engine.as_ref(), bundle.candidates)
            .await
    }

    fn assign_role(&self, role: Role) -> Result<(u64, Vec<Arc<LocalTrack>>), CallError> {
        self.update(|inner| {
            let tracks = inner.media.tracks();
            if tracks.is_empty() {
                return Err(MediaAccessError::NotStarted.into());
            }
            let generation = inner.machine.assign_role(role)?;
            Ok((generation, tracks))
        })
    }

    /// Создаём движок, регистрируем слушателей и добавляем локальные треки
    async fn open_engine(
        &self,
        generation: u64,
        tracks: Vec<Arc<LocalTrack>>,
    ) -> Result<Arc<dyn TransportEngine>, CallError> {
        let events = EventSender::new(generation, self.events_tx.clone());
        let created = self.engines.create(events).await;
        let engine = self.settle(generation, created, "create transport engine")?;

        let installed = self.update(|inner| {
            if inner.machine.generation() != generation {
                return false;
            }
            inner.engine = Some(engine.clone());
            true
        });
        if !installed {
            // terminate() успел раньше: движок никому не принадлежит
            if let Err(e) = engine.close().await {
                warn!("Failed to close orphaned transport engine: {}", e);
            }
            return Err(CallError::Terminated);
        }

        for track in tracks {
            let added = engine.add_track(track).await;
            self.settle(generation, added, "add local track")?;
        }
        Ok(engine)
    }

    /// Отклонённый кандидат не прерывает остальные
    async fn drain_candidates(
        &self,
        generation: u64,
        engine: &dyn TransportEngine,
        candidates: Vec<NetworkCandidate>,
    ) -> Result<DrainReport, CallError> {
        let mut report = DrainReport::default();
        for candidate in candidates {
            let text = candidate.candidate.clone();
            let added = engine.add_candidate(candidate).await;
            if self.generation() != generation {
                return Err(CallError::Terminated);
            }
            match added {
                Ok(()) => {
                    debug!("Applied remote candidate: {}", text);
                    report.applied += 1;
                }
                Err(e) => {
                    let err = CallError::InvalidCandidate(format!("{text}: {e}"));
                    self.report(&err);
                    report.rejected.push(err);
                }
            }
        }
        info!(
            "Remote candidates drained: {} applied, {} rejected",
            report.applied,
            report.rejected.len()
        );
        Ok(report)
    }

    /// Сверяет результат примитива с текущим поколением.
    /// Устаревший результат отбрасывается, ошибка переводит сессию в Failed.
    fn settle<T>(
        &self,
        generation: u64,
        result: Result<T, EngineError>,
        what: &str,
    ) -> Result<T, CallError> {
        self.update(|inner| {
            if inner.machine.generation() != generation {
                debug!("Dropping {} result from stale generation {}", what, generation);
                return Err(CallError::Terminated);
            }
            result.map_err(|e| {
                inner.machine.fail(generation);
                CallError::negotiation(format!("{what}: {e}"))
            })
        })
    }
}

fn decode_expecting(code: &str, expected: Role) -> Result<SessionBundle, CallError> {
    let bundle = codec::decode(code)?;
    if bundle.role != expected {
        return Err(InvalidCodeError::RoleMismatch {
            expected,
            actual: bundle.role,
        }
        .into());
    }
    Ok(bundle)
}
