pub mod call_api;
pub mod util_api;

use crate::config::Config;
use crate::logger::init_logging;
use crate::peer::connection::WebrtcEngineFactory;
use crate::peer::media::SampleTrackSource;
use crate::peer::types::ServerConfig;
use crate::session::PeerSessionController;
use std::sync::{Arc, Mutex, RwLock};
use tauri::plugin::{Builder, TauriPlugin};
use tauri::{Emitter, Manager, Runtime};
use tracing::{info, warn};

/// Событие со свежим снимком сессии для фронтенда
pub const SNAPSHOT_EVENT: &str = "p2p-snapshot";

/// Состояние плагина, доступное командам через `State`
pub struct CallState {
    pub controller: Arc<PeerSessionController>,
    config: Mutex<Config>,
    ice_servers: Arc<RwLock<Vec<ServerConfig>>>,
}

/// Плагин "p2p-call": команды сессии и рассылка снимков
pub fn init<R: Runtime>(config: Config) -> TauriPlugin<R> {
    Builder::new("p2p-call")
        .invoke_handler(tauri::generate_handler![
            // Call API
            call_api::start_local_media,
            call_api::start_as_caller,
            call_api::join_as_callee,
            call_api::complete_as_caller,
            call_api::toggle_audio,
            call_api::toggle_video,
            call_api::terminate,
            call_api::snapshot,
            // Utility functions
            util_api::code_fingerprint,
            util_api::get_ice_servers,
            util_api::set_ice_servers,
        ])
        .setup(move |app, _api| {
            init_logging(&config.logging);

            let factory = WebrtcEngineFactory::new(&config);
            let ice_servers = factory.ice_servers_handle();
            let controller = Arc::new(PeerSessionController::new(
                Arc::new(factory),
                Arc::new(SampleTrackSource),
                config.media_kinds.clone(),
            ));

            let runner = controller.clone();
            tauri::async_runtime::spawn(async move { runner.run().await });

            let mut snapshots = controller.subscribe();
            let handle = app.clone();
            tauri::async_runtime::spawn(async move {
                while snapshots.changed().await.is_ok() {
                    let snapshot = snapshots.borrow_and_update().clone();
                    if let Err(e) = handle.emit(SNAPSHOT_EVENT, snapshot) {
                        warn!("Failed to emit {}: {}", SNAPSHOT_EVENT, e);
                    }
                }
            });

            app.manage(CallState {
                controller,
                config: Mutex::new(config),
                ice_servers,
            });
            info!("p2p-call plugin initialized");
            Ok(())
        })
        .build()
}
