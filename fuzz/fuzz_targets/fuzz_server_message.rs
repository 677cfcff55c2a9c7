#![no_main]

use libfuzzer_sys::fuzz_target;
use watch_party_relay::event::RelayEvent;
use watch_party_relay::protocol::ServerMessage;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<ServerMessage>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(msg) = serde_json::from_str::<ServerMessage>(s) {
            // Whatever decodes must re-encode and convert cleanly.
            let _ = serde_json::to_string(&msg);
            let _ = RelayEvent::from(msg);
        }
    }
});
