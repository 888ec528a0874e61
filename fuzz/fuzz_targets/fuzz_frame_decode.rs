#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Whatever arrives on the wire, decoding must return an error value —
    // never panic, never read out of bounds, never allocate a declared
    // length it hasn't seen.
    let _ = greenroom_signal_server::frame::decode_frame(data);
    let _ = greenroom_signal_server::frame::declared_frame_len(data);
});
