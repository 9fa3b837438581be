//! Active-heading tracking for the table of contents.
//!
//! The tracker mirrors the scroll position of the host's content viewport
//! against the vertical positions of the document's headings. A heading is
//! "current" once it has scrolled into the top band of the viewport; among
//! all headings inside the band, the first in document order wins, so that
//! scrolling past several headings at once still reports the topmost one.
//! Once a heading is current it stays current until another heading enters
//! the band or the heading set is replaced, so the TOC marker does not drop
//! out while reading the body of a section.

/// Fraction of the viewport height that counts as the activation band.
const TOP_BAND_RATIO: f32 = 0.2;

/// A heading anchor with its vertical position in document pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingPosition {
    pub id: String,
    pub y: f32,
}

/// The observed scroll container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Scroll offset of the container top, in document pixels.
    pub scroll_y: f32,
    /// Visible height of the container.
    pub height: f32,
}

/// Derives the current heading from heading positions and a viewport.
///
/// The observation set is replaced wholesale whenever the heading list or
/// the viewport changes; there is no incremental state to migrate.
#[derive(Default)]
pub struct ActiveHeadingTracker {
    headings: Vec<HeadingPosition>,
    viewport: Option<Viewport>,
    /// Most recent heading observed in the band; retained while the band
    /// is empty.
    last_active: Option<String>,
}

impl ActiveHeadingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked heading set (document order). Discards the
    /// current heading; it belonged to the old set.
    pub fn set_headings(&mut self, headings: Vec<HeadingPosition>) {
        self.headings = headings;
        self.last_active = None;
        self.observe();
    }

    /// Replace the observed viewport. `None` when no container is available.
    pub fn set_viewport(&mut self, viewport: Option<Viewport>) {
        self.viewport = viewport;
        self.observe();
    }

    fn observe(&mut self) {
        let Some(vp) = self.viewport else {
            return;
        };
        let band_top = vp.scroll_y;
        let band_bottom = vp.scroll_y + vp.height * TOP_BAND_RATIO;
        // First in document order, not most recently intersected. An empty
        // band keeps the previous observation.
        if let Some(h) = self
            .headings
            .iter()
            .find(|h| h.y >= band_top && h.y <= band_bottom)
        {
            self.last_active = Some(h.id.clone());
        }
    }

    /// The id of the current heading, or `None` when none has entered the
    /// band yet.
    pub fn active(&self) -> Option<&str> {
        self.last_active.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(id: &str, y: f32) -> HeadingPosition {
        HeadingPosition { id: id.into(), y }
    }

    fn tracker(headings: Vec<HeadingPosition>, viewport: Option<Viewport>) -> ActiveHeadingTracker {
        let mut t = ActiveHeadingTracker::new();
        t.set_headings(headings);
        t.set_viewport(viewport);
        t
    }

    #[test]
    fn topmost_of_simultaneous_intersections_wins() {
        // a (level 1), b and c (level 2) all inside the top band at once.
        let t = tracker(
            vec![pos("a", 0.0), pos("b", 50.0), pos("c", 100.0)],
            Some(Viewport {
                scroll_y: 0.0,
                height: 1000.0,
            }),
        );
        assert_eq!(t.active(), Some("a"));
    }

    #[test]
    fn heading_below_band_is_not_active() {
        let t = tracker(
            vec![pos("a", 500.0)],
            Some(Viewport {
                scroll_y: 0.0,
                height: 1000.0,
            }),
        );
        // Band is the top 20% (0..200); a at 500 has not reached it yet.
        assert_eq!(t.active(), None);
    }

    #[test]
    fn scrolling_moves_heading_into_band() {
        let mut t = tracker(
            vec![pos("a", 0.0), pos("b", 500.0)],
            Some(Viewport {
                scroll_y: 0.0,
                height: 1000.0,
            }),
        );
        assert_eq!(t.active(), Some("a"));
        t.set_viewport(Some(Viewport {
            scroll_y: 450.0,
            height: 1000.0,
        }));
        // a is above the viewport now; b sits in the band.
        assert_eq!(t.active(), Some("b"));
    }

    #[test]
    fn heading_stays_active_after_leaving_band() {
        let mut t = tracker(
            vec![pos("a", 0.0), pos("b", 900.0)],
            Some(Viewport {
                scroll_y: 0.0,
                height: 1000.0,
            }),
        );
        assert_eq!(t.active(), Some("a"));
        // a has scrolled above the band (300..500) and b has not reached
        // it; the section under a is still the one being read.
        t.set_viewport(Some(Viewport {
            scroll_y: 300.0,
            height: 1000.0,
        }));
        assert_eq!(t.active(), Some("a"));
    }

    #[test]
    fn empty_heading_list_is_never_active() {
        let t = tracker(
            vec![],
            Some(Viewport {
                scroll_y: 0.0,
                height: 1000.0,
            }),
        );
        assert_eq!(t.active(), None);
    }

    #[test]
    fn missing_viewport_is_never_active() {
        let t = tracker(vec![pos("a", 0.0)], None);
        assert_eq!(t.active(), None);
    }

    #[test]
    fn replacing_headings_discards_prior_observation() {
        let mut t = tracker(
            vec![pos("a", 0.0)],
            Some(Viewport {
                scroll_y: 0.0,
                height: 1000.0,
            }),
        );
        assert_eq!(t.active(), Some("a"));
        t.set_headings(vec![pos("z", 10.0)]);
        assert_eq!(t.active(), Some("z"));
    }
}
