#![no_main]

use std::collections::{HashMap, HashSet};

use libfuzzer_sys::fuzz_target;
use mdlive::document::{compose, render_formatted, render_raw};

fuzz_target!(|data: &[u8]| {
    let Ok(markdown) = std::str::from_utf8(data) else {
        return;
    };

    // Neither view may panic on arbitrary input.
    let formatted = render_formatted(markdown, 1);
    let raw = render_raw(markdown);

    // Heading slugs must be unique and levels in the HTML range.
    let mut seen = HashSet::new();
    for heading in &formatted.outline {
        assert!(
            (1..=6).contains(&heading.level),
            "heading level {} out of range",
            heading.level,
        );
        assert!(seen.insert(heading.id.clone()), "duplicate slug {:?}", heading.id);
    }

    // Every anchor refers to a heading in the outline.
    let ids: HashSet<&str> = formatted.outline.iter().map(|h| h.id.as_str()).collect();
    for anchor in &formatted.anchors {
        assert!(ids.contains(anchor.id.as_str()), "anchor without heading: {:?}", anchor.id);
    }

    // Raw view never produces an outline.
    assert!(raw.outline.is_empty());

    // Composition with no async results must fall back, not panic.
    let _ = compose(&formatted.blocks, &HashMap::new());
    let _ = compose(&raw.blocks, &HashMap::new());
});
