use crate::error::DecodeError;
use crate::peer::types::SessionBundle;
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

/// Ограничение распакованного размера для защиты от zip-bomb
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024; // 256 KiB

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Кодирует пакет в однострочный код для копирования
pub fn encode(bundle: &SessionBundle) -> io::Result<String> {
    // 1. JSON -> bytes
    let json = serde_json::to_vec(bundle)?;

    // 2. GZIP compress
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)?;
    let compressed = gz.finish()?;

    // 3. base64
    Ok(general_purpose::STANDARD.encode(compressed))
}

/// Разбирает код обратно в пакет
pub fn decode(code: &str) -> Result<SessionBundle, DecodeError> {
    // 1. base64 -> bytes
    let raw = general_purpose::STANDARD
        .decode(code.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    // 2. gunzip; коды без gzip (голый base64(JSON)) принимаем как есть
    let json = if raw.starts_with(&GZIP_MAGIC) {
        // читаем на байт больше лимита, чтобы отличить превышение от конца потока
        let mut json = Vec::new();
        GzDecoder::new(&raw[..])
            .take(MAX_DECOMPRESSED_SIZE + 1)
            .read_to_end(&mut json)
            .map_err(|e| DecodeError::Decompress(e.to_string()))?;
        json
    } else {
        raw
    };
    if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(DecodeError::TooLarge {
            limit: MAX_DECOMPRESSED_SIZE,
        });
    }

    // 3. JSON -> struct
    let bundle: SessionBundle =
        serde_json::from_slice(&json).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if bundle.description.is_null() {
        return Err(DecodeError::Malformed("description is null".into()));
    }
    Ok(bundle)
}

/// Короткий отпечаток кода: 6 байт SHA-256, 12 hex символов
pub fn fingerprint(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::{Description, NetworkCandidate, Role};
    use serde_json::json;

    fn offer_bundle(candidates: Vec<NetworkCandidate>) -> SessionBundle {
        SessionBundle {
            role: Role::Offer,
            description: Description::new(json!({ "type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n" })),
            candidates,
        }
    }

    fn host_candidate() -> NetworkCandidate {
        NetworkCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.1.2 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        }
    }

    #[test]
    fn round_trip_preserves_bundle() {
        let bundle = offer_bundle(vec![host_candidate(), NetworkCandidate::new("candidate:2 1 udp 1 10.0.0.1 9 typ relay")]);
        let code = encode(&bundle).unwrap();
        assert_eq!(decode(&code).unwrap(), bundle);
    }

    #[test]
    fn empty_candidate_list_is_valid() {
        let bundle = SessionBundle {
            role: Role::Answer,
            ..offer_bundle(Vec::new())
        };
        let code = encode(&bundle).unwrap();
        assert_eq!(decode(&code).unwrap(), bundle);
    }

    #[test]
    fn code_is_single_line_and_deterministic() {
        let bundle = offer_bundle(vec![host_candidate()]);
        let first = encode(&bundle).unwrap();
        assert!(!first.contains('\n'));
        assert_eq!(first, encode(&bundle).unwrap());
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let bundle = offer_bundle(vec![host_candidate()]);
        let code = format!("  {}\n", encode(&bundle).unwrap());
        assert_eq!(decode(&code).unwrap(), bundle);
    }

    #[test]
    fn rejects_non_base64() {
        assert!(matches!(decode("not-base64!!"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn rejects_payload_that_is_not_json() {
        let code = general_purpose::STANDARD.encode(b"hello there");
        assert!(matches!(decode(&code), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn rejects_missing_role_and_description() {
        let no_role = json!({ "description": { "sdp": "x" }, "candidates": [] });
        let code = general_purpose::STANDARD.encode(no_role.to_string());
        assert!(matches!(decode(&code), Err(DecodeError::Malformed(_))));

        let no_description = json!({ "role": "offer", "candidates": [] });
        let code = general_purpose::STANDARD.encode(no_description.to_string());
        assert!(matches!(decode(&code), Err(DecodeError::Malformed(_))));

        let null_description = json!({ "role": "offer", "description": null, "candidates": [] });
        let code = general_purpose::STANDARD.encode(null_description.to_string());
        assert!(matches!(decode(&code), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn rejects_badly_shaped_candidates() {
        let not_a_list = json!({ "role": "offer", "description": {}, "candidates": "nope" });
        let code = general_purpose::STANDARD.encode(not_a_list.to_string());
        assert!(matches!(decode(&code), Err(DecodeError::Malformed(_))));

        let missing_field = json!({ "role": "offer", "description": {}, "candidates": [{ "sdpMid": "0" }] });
        let code = general_purpose::STANDARD.encode(missing_field.to_string());
        assert!(matches!(decode(&code), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn accepts_uncompressed_json_codes() {
        let plain = json!({
            "role": "offer",
            "description": { "type": "offer", "sdp": "v=0" },
            "candidates": [{ "candidate": "candidate:1 1 udp 1 1.2.3.4 5 typ srflx", "sdpMid": "0", "sdpMLineIndex": 0 }]
        });
        let code = general_purpose::STANDARD.encode(plain.to_string());
        let bundle = decode(&code).unwrap();
        assert_eq!(bundle.role, Role::Offer);
        assert_eq!(bundle.candidates.len(), 1);
        assert_eq!(bundle.candidates[0].sdp_mline_index, Some(0));
        assert_eq!(bundle.candidates[0].username_fragment, None);
    }

    #[test]
    fn corrupted_gzip_is_a_decompress_error() {
        let mut raw = GZIP_MAGIC.to_vec();
        raw.extend_from_slice(b"definitely not deflate");
        let code = general_purpose::STANDARD.encode(raw);
        assert!(matches!(decode(&code), Err(DecodeError::Decompress(_))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        // валидный JSON с хвостом пробелов больше лимита
        let mut payload = serde_json::to_vec(&offer_bundle(Vec::new())).unwrap();
        payload.resize(MAX_DECOMPRESSED_SIZE as usize + 16, b' ');

        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(&payload).unwrap();
        let code = general_purpose::STANDARD.encode(gz.finish().unwrap());
        assert_eq!(
            decode(&code),
            Err(DecodeError::TooLarge {
                limit: MAX_DECOMPRESSED_SIZE
            })
        );

        let plain = general_purpose::STANDARD.encode(&payload);
        assert!(matches!(decode(&plain), Err(DecodeError::TooLarge { .. })));
    }

    #[test]
    fn payload_at_the_limit_is_accepted() {
        let mut payload = serde_json::to_vec(&offer_bundle(Vec::new())).unwrap();
        payload.resize(MAX_DECOMPRESSED_SIZE as usize, b' ');

        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(&payload).unwrap();
        let code = general_purpose::STANDARD.encode(gz.finish().unwrap());
        assert_eq!(decode(&code).unwrap(), offer_bundle(Vec::new()));
    }

    #[test]
    fn fingerprint_is_twelve_hex_chars() {
        let fp = fingerprint("abc");
        assert_eq!(fp.len(), 12);
        assert_eq!(fp, "ba7816bf8f01");
        assert_ne!(fp, fingerprint("abd"));
    }
}
