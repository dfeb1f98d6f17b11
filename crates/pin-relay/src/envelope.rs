//! Wire envelope model and control-message interception
//!
//! Every frame exchanged over a leg is a JSON envelope `{ "type": ..., "data": ... }`.
//! The broker interprets exactly one type, the PC leg's base-directory
//! announcement; every other type is opaque and relayed verbatim so the two
//! endpoints can evolve their own protocol without broker changes.

use serde::{Deserialize, Serialize};

/// The one envelope type the broker consumes instead of relaying.
pub const REGISTER_BASE_DIR: &str = "register_base_dir";

/// Application message envelope. `data` is only ever decoded for the reserved
/// control type; relayed frames are passed through as raw text, never
/// re-serialized from this struct.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BaseDirPayload {
    path: String,
}

/// Disposition of a frame read from the PC leg.
#[derive(Debug, PartialEq)]
pub enum PcFrame {
    /// Base-directory announcement: consume, never forward.
    BaseDir(String),
    /// Any other well-formed envelope: forward the raw frame to the user leg.
    Forward,
    /// Not a usable envelope: drop, log only.
    Invalid(&'static str),
}

/// Classify a raw text frame from the PC leg.
pub fn classify(raw: &str) -> PcFrame {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(_) => return PcFrame::Invalid("not a message envelope"),
    };

    if envelope.kind == REGISTER_BASE_DIR {
        match serde_json::from_value::<BaseDirPayload>(envelope.data) {
            Ok(payload) => PcFrame::BaseDir(payload.path),
            Err(_) => PcFrame::Invalid("register_base_dir without a path"),
        }
    } else {
        PcFrame::Forward
    }
}


#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Any well-formed envelope with a non-reserved type is forwarded,
        // whatever its payload looks like.
        #[test]
        fn prop_non_reserved_types_forward(
            kind in "[a-z_]{1,24}",
            payload in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            prop_assume!(kind != REGISTER_BASE_DIR);
            let raw = serde_json::to_string(&Envelope {
                kind,
                data: serde_json::json!({ "bytes": payload }),
            })
            .unwrap();
            prop_assert_eq!(classify(&raw), PcFrame::Forward);
        }

        // A reserved-type envelope with a string path always yields that
        // exact path; it never falls through to forwarding.
        #[test]
        fn prop_reserved_type_never_forwards(path in ".{0,32}") {
            let raw = serde_json::to_string(&Envelope {
                kind: REGISTER_BASE_DIR.to_string(),
                data: serde_json::json!({ "path": path.clone() }),
            })
            .unwrap();
            prop_assert_eq!(classify(&raw), PcFrame::BaseDir(path));
        }
    }
}
