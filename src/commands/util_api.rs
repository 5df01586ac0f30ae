use super::CallState;
use crate::peer::codec::fingerprint;
use crate::peer::types::ServerConfig;
use std::sync::PoisonError;
use tauri::{command, State};
use tracing::info;

/// отпечаток кода для сверки голосом
#[command]
pub fn code_fingerprint(code: String) -> String {
    fingerprint(code.trim())
}

#[command]
pub fn get_ice_servers(state: State<'_, CallState>) -> Vec<ServerConfig> {
    state
        .config
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .ice_servers()
        .to_vec()
}

/// Новые серверы действуют со следующей сессии; пустой список возвращает дефолтные
#[command]
pub fn set_ice_servers(
    state: State<'_, CallState>,
    servers: Vec<ServerConfig>,
) -> Result<Vec<ServerConfig>, String> {
    let mut config = state.config.lock().unwrap_or_else(PoisonError::into_inner);
    config.set_ice_servers(servers).map_err(|e| e.to_string())?;

    let applied = config.ice_servers().to_vec();
    *state
        .ice_servers
        .write()
        .unwrap_or_else(PoisonError::into_inner) = applied.clone();
    info!("ICE servers updated: {} configured", applied.len());
    Ok(applied)
}
