use super::CallState;
use crate::error::CallError;
use crate::peer::types::{DrainReport, SessionHandle, SessionSnapshot};
use tauri::{command, State};
use tracing::debug;

fn user_error(err: CallError) -> String {
    err.user_message().to_owned()
}

/// захват камеры и микрофона
#[command]
pub async fn start_local_media(state: State<'_, CallState>) -> Result<(), String> {
    state.controller.start_local_media().await.map_err(user_error)
}

/// A-сторона: код OFFER появится в снимке
#[command]
pub async fn start_as_caller(state: State<'_, CallState>) -> Result<SessionHandle, String> {
    state.controller.start_as_caller().await.map_err(user_error)
}

/// B-сторона: вставленный код OFFER
#[command]
pub async fn join_as_callee(
    state: State<'_, CallState>,
    code: String,
) -> Result<SessionHandle, String> {
    debug!("join_as_callee called with {} chars", code.len());
    state
        .controller
        .join_as_callee(&code)
        .await
        .map_err(user_error)
}

/// A-сторона: вставленный код ANSWER
#[command]
pub async fn complete_as_caller(
    state: State<'_, CallState>,
    code: String,
) -> Result<DrainReport, String> {
    debug!("complete_as_caller called with {} chars", code.len());
    state
        .controller
        .complete_as_caller(&code)
        .await
        .map_err(user_error)
}

#[command]
pub fn toggle_audio(state: State<'_, CallState>) -> bool {
    state.controller.toggle_audio()
}

#[command]
pub fn toggle_video(state: State<'_, CallState>) -> bool {
    state.controller.toggle_video()
}

/// ручное разъединение
#[command]
pub async fn terminate(state: State<'_, CallState>) -> Result<(), String> {
    state.controller.terminate().await;
    Ok(())
}

#[command]
pub fn snapshot(state: State<'_, CallState>) -> SessionSnapshot {
    state.controller.snapshot()
}
