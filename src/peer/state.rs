use crate::error::CallError;
use crate::logger::{analyze_candidates, dump_candidate};
use crate::peer::codec;
use crate::peer::engine::{EngineEvent, TaggedEvent};
use crate::peer::types::{ConnectivityState, Description, NetworkCandidate, Phase, Role, SessionBundle};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

/// ========== PEER SESSION ==========

/// Живой объект согласования. Роль задаётся один раз при создании.
#[derive(Debug, Clone)]
pub struct PeerSession {
    role: Role,
    phase: Phase,
    local_description: Option<Description>,
    local_candidates: Vec<NetworkCandidate>,
    published_code: Option<String>,
    published_at: Option<DateTime<Utc>>,
    status: ConnectivityState,
    remote_applied: bool,
    remote_track_available: bool,
}

impl PeerSession {
    fn new(role: Role) -> Self {
        Self {
            role,
            phase: Phase::RoleAssigned,
            local_description: None,
            local_candidates: Vec::new(),
            published_code: None,
            published_at: None,
            status: ConnectivityState::New,
            remote_applied: false,
            remote_track_available: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn local_description(&self) -> Option<&Description> {
        self.local_description.as_ref()
    }

    pub fn local_candidates(&self) -> &[NetworkCandidate] {
        &self.local_candidates
    }

    pub fn published_code(&self) -> Option<&str> {
        self.published_code.as_deref()
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    pub fn status(&self) -> ConnectivityState {
        self.status
    }

    pub fn remote_applied(&self) -> bool {
        self.remote_applied
    }

    pub fn remote_track_available(&self) -> bool {
        self.remote_track_available
    }

    /// Кандидаты копятся до выхода из фаз согласования
    fn accepts_candidates(&self) -> bool {
        matches!(
            self.phase,
            Phase::RoleAssigned | Phase::Negotiating | Phase::AwaitingRemoteCompletion
        )
    }

    /// Код всегда полностью пересобирается из текущего состояния
    fn republish(&mut self) {
        let Some(description) = &self.local_description else {
            self.published_code = None;
            return;
        };
        let bundle = SessionBundle {
            role: self.role,
            description: description.clone(),
            candidates: self.local_candidates.clone(),
        };
        match codec::encode(&bundle) {
            Ok(code) => {
                debug!(
                    "Republished {} code with {} candidates, encoded length: {}",
                    self.role,
                    self.local_candidates.len(),
                    code.len()
                );
                analyze_candidates(&self.local_candidates);
                self.published_code = Some(code);
                self.published_at = Some(Utc::now());
            }
            Err(e) => {
                error!("Failed to encode {} code: {}", self.role, e);
                self.published_code = None;
                self.published_at = None;
            }
        }
    }
}

/// ========== SIGNALING STATE MACHINE ==========

/// Владеет текущей сессией и поколением; решает, когда пересобирать код.
#[derive(Debug, Default)]
pub struct SignalingStateMachine {
    generation: u64,
    session: Option<PeerSession>,
    disposed: bool,
}

impl SignalingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session(&self) -> Option<&PeerSession> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> Phase {
        match &self.session {
            Some(session) => session.phase,
            None if self.disposed => Phase::Closed,
            None => Phase::Idle,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|s| s.role)
    }

    pub fn published_code(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.published_code())
    }

    pub fn local_candidates(&self) -> &[NetworkCandidate] {
        self.session
            .as_ref()
            .map(|s| s.local_candidates())
            .unwrap_or(&[])
    }

    /// После terminate() движок закрыт, статус Closed
    pub fn status(&self) -> ConnectivityState {
        match &self.session {
            Some(session) => session.status,
            None if self.disposed => ConnectivityState::Closed,
            None => ConnectivityState::New,
        }
    }

    /// Сессия текущего поколения, если она ещё жива
    fn current(&mut self, generation: u64) -> Option<&mut PeerSession> {
        if generation != self.generation {
            trace!(
                "Dropping result from stale generation {} (current {})",
                generation,
                self.generation
            );
            return None;
        }
        self.session.as_mut()
    }

    /// Idle → RoleAssigned. Возвращает поколение новой сессии.
    pub fn assign_role(&mut self, role: Role) -> Result<u64, CallError> {
        let phase = self.phase();
        if !matches!(phase, Phase::Idle | Phase::Closed) {
            return Err(CallError::WrongPhase {
                expected: Phase::Idle,
                actual: phase,
            });
        }
        self.session = Some(PeerSession::new(role));
        self.disposed = false;
        info!("Role assigned: {} (generation {})", role, self.generation);
        Ok(self.generation)
    }

    /// RoleAssigned → Negotiating, когда движок создал offer/answer
    pub fn description_created(&mut self, generation: u64) -> bool {
        let Some(session) = self.current(generation) else {
            return false;
        };
        if session.phase != Phase::RoleAssigned {
            return false;
        }
        session.phase = Phase::Negotiating;
        debug!("{} description created, negotiating", session.role);
        true
    }

    /// Локальное описание установлено: публикуем код.
    /// Для инициатора сразу переходим в ожидание ответа.
    pub fn local_description_set(&mut self, generation: u64, description: Description) -> bool {
        let Some(session) = self.current(generation) else {
            return false;
        };
        if session.phase != Phase::Negotiating {
            return false;
        }
        session.local_description = Some(description);
        session.republish();
        if session.role == Role::Offer {
            session.phase = Phase::AwaitingRemoteCompletion;
            debug!("Offer set as local description, awaiting answer code");
        }
        true
    }

    /// Удалённое описание принято движком
    pub fn remote_description_applied(&mut self, generation: u64) -> bool {
        let Some(session) = self.current(generation) else {
            return false;
        };
        session.remote_applied = true;
        true
    }

    /// Любая нетерминальная фаза → Failed
    pub fn fail(&mut self, generation: u64) -> bool {
        let Some(session) = self.current(generation) else {
            return false;
        };
        if session.phase.is_terminal() {
            return false;
        }
        warn!("{} session failed in phase {}", session.role, session.phase);
        session.phase = Phase::Failed;
        true
    }

    /// Применяет событие движка. Устаревшие события молча отбрасываются.
    pub fn apply(&mut self, tagged: TaggedEvent) -> bool {
        let Some(session) = self.current(tagged.generation) else {
            return false;
        };
        if session.phase.is_terminal() {
            trace!("Ignoring {:?} in terminal phase {}", tagged.event, session.phase);
            return false;
        }
        match tagged.event {
            EngineEvent::CandidateDiscovered(candidate) => {
                if !session.accepts_candidates() {
                    trace!(
                        "Ignoring local candidate in phase {}: {}",
                        session.phase,
                        candidate.candidate
                    );
                    return false;
                }
                dump_candidate("LOCAL", &candidate);
                session.local_candidates.push(candidate);
                session.republish();
                true
            }
            EngineEvent::ConnectivityStateChanged(state) => {
                debug!("Connectivity state changed to {:?}", state);
                session.status = state;
                match state {
                    ConnectivityState::Connected
                        if matches!(
                            session.phase,
                            Phase::Negotiating | Phase::AwaitingRemoteCompletion
                        ) =>
                    {
                        info!("{} session connected", session.role);
                        session.phase = Phase::Connected;
                    }
                    ConnectivityState::Failed if !session.phase.is_terminal() => {
                        warn!("Transport reported failure in phase {}", session.phase);
                        session.phase = Phase::Failed;
                    }
                    _ => {}
                }
                true
            }
            EngineEvent::TrackReceived(track) => {
                info!("Remote {:?} track received: {}", track.kind, track.id);
                session.remote_track_available = true;
                true
            }
        }
    }

    /// Любая фаза → Closed. Повторный вызов безопасен.
    pub fn terminate(&mut self) {
        self.generation += 1;
        if let Some(session) = self.session.take() {
            info!(
                "Terminating {} session in phase {} (next generation {})",
                session.role, session.phase, self.generation
            );
        }
        self.disposed = true;
    }
}
