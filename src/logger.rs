use crate::config::{LoggingConfig, LOGGING_ENABLED};
use crate::peer::types::NetworkCandidate;
use tracing::{debug, trace, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Формат временных меток в логах
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Подключает подписчика tracing с временными метками.
/// В release-сборке логирование выключено; повторный вызов ничего не делает.
pub fn init_logging(config: &LoggingConfig) -> bool {
    if !LOGGING_ENABLED || !config.enabled {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_owned()))
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .try_init()
        .is_ok()
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &NetworkCandidate) {
    trace!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index,
        cand.username_fragment
    );
}

/// Считает кандидатов по типам: host / srflx / relay
pub fn candidate_counts(candidates: &[NetworkCandidate]) -> (usize, usize, usize) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }
    (host_count, srflx_count, relay_count)
}

pub fn analyze_candidates(candidates: &[NetworkCandidate]) {
    let (host_count, srflx_count, relay_count) = candidate_counts(candidates);

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    if relay_count == 0 && !candidates.is_empty() {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_candidate_types() {
        let candidates = [
            NetworkCandidate::new("candidate:1 1 udp 1 192.168.0.2 5000 typ host"),
            NetworkCandidate::new("candidate:2 1 udp 1 203.0.113.5 5001 typ srflx raddr 0.0.0.0 rport 0"),
            NetworkCandidate::new("candidate:3 1 udp 1 198.51.100.7 5002 typ relay raddr 0.0.0.0 rport 0"),
            NetworkCandidate::new("candidate:4 1 udp 1 192.168.0.3 5003 typ host"),
        ];
        assert_eq!(candidate_counts(&candidates), (2, 1, 1));
        assert_eq!(candidate_counts(&[]), (0, 0, 0));
    }
}
