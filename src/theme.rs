//! Built-in color themes.

/// A named color theme and its engine mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,
    /// syntect theme used for code highlighting.
    pub syntect: &'static str,
    /// Whether the diagram engine should use its dark palette.
    pub dark: bool,
}

pub const THEMES: &[Theme] = &[
    Theme {
        name: "light",
        syntect: "InspiredGitHub",
        dark: false,
    },
    Theme {
        name: "dark",
        syntect: "base16-ocean.dark",
        dark: true,
    },
];

/// Default theme name.
pub const DEFAULT_THEME: &str = "light";

/// Look up a built-in theme by name.
pub fn get(name: &str) -> Option<Theme> {
    THEMES.iter().find(|t| t.name == name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_theme_exists() {
        assert!(get(DEFAULT_THEME).is_some());
    }

    #[test]
    fn unknown_theme_returns_none() {
        assert!(get("nonexistent").is_none());
    }

    #[test]
    fn dark_theme_maps_to_dark_palette() {
        assert!(get("dark").unwrap().dark);
        assert!(!get("light").unwrap().dark);
    }
}
