#![no_main]

use libfuzzer_sys::fuzz_target;
use mdlive::events::{ChannelEvent, run_channel};

fuzz_target!(|data: &[u8]| {
    let mut events = Vec::new();
    run_channel(std::io::Cursor::new(data.to_vec()), |ev| events.push(ev));

    // Closed is delivered exactly once, as the final event, no matter how
    // mangled the stream is.
    assert_eq!(events.last(), Some(&ChannelEvent::Closed));
    let closed = events.iter().filter(|e| **e == ChannelEvent::Closed).count();
    assert_eq!(closed, 1);
});
