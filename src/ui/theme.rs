//! Terminal presentation settings: color styles and quiet mode.
//!
//! Settings are fixed once per process by [`configure`]. Without it the
//! environment decides (`NO_COLOR`, `KGSYNC_QUIET`).

use owo_colors::Style;
use std::sync::OnceLock;

static SETTINGS: OnceLock<UiSettings> = OnceLock::new();

/// When to color output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ColorChoice {
    /// Color on a terminal unless `NO_COLOR` is set
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    /// Whether output gets colored, given the environment
    pub fn enabled(self, no_color_env: bool, is_term: bool) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => is_term && !no_color_env,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Theme {
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub warn: Style,
    pub info: Style,
    pub dim: Style,
    pub muted: Style,
    /// Record keys and namespaces
    pub key: Style,
}

impl Theme {
    pub fn for_choice(choice: ColorChoice) -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some();
        if choice.enabled(no_color, console::Term::stdout().is_term()) {
            Self::colored()
        } else {
            Self::plain()
        }
    }

    pub fn colored() -> Self {
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            warn: Style::new().yellow().bold(),
            info: Style::new().magenta(),
            dim: Style::new().white().dimmed(),
            muted: Style::new().bright_black(),
            key: Style::new().blue(),
        }
    }

    pub fn plain() -> Self {
        let none = Style::new();
        Self {
            header: none,
            success: none,
            error: none,
            warn: none,
            info: none,
            dim: none,
            muted: none,
            key: none,
        }
    }
}

/// Process-wide presentation settings
#[derive(Debug, Clone)]
pub struct UiSettings {
    pub theme: Theme,
    /// Suppress banners, tables and progress; reports and errors still print
    pub quiet: bool,
}

impl UiSettings {
    pub fn new(color: ColorChoice, quiet: bool) -> Self {
        Self {
            theme: Theme::for_choice(color),
            quiet,
        }
    }

    fn from_env() -> Self {
        Self::new(ColorChoice::Auto, quiet_from_env(std::env::var("KGSYNC_QUIET").ok().as_deref()))
    }
}

/// `KGSYNC_QUIET=1` or `KGSYNC_QUIET=true`
pub fn quiet_from_env(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Fix the settings for this process. Returns false if they were already set.
pub fn configure(settings: UiSettings) -> bool {
    SETTINGS.set(settings).is_ok()
}

fn settings() -> &'static UiSettings {
    SETTINGS.get_or_init(UiSettings::from_env)
}

pub fn theme() -> &'static Theme {
    &settings().theme
}

pub fn is_quiet() -> bool {
    settings().quiet
}

#[cfg(test)]
mod tests {
    use super::*;
    use owo_colors::OwoColorize;

    #[test]
    fn test_auto_color_needs_terminal_and_no_opt_out() {
        assert!(ColorChoice::Auto.enabled(false, true));
        assert!(!ColorChoice::Auto.enabled(true, true));
        assert!(!ColorChoice::Auto.enabled(false, false));
    }

    #[test]
    fn test_explicit_color_choice_ignores_environment() {
        assert!(ColorChoice::Always.enabled(true, false));
        assert!(!ColorChoice::Never.enabled(false, true));
    }

    #[test]
    fn test_quiet_from_env_values() {
        assert!(quiet_from_env(Some("1")));
        assert!(quiet_from_env(Some("TRUE")));
        assert!(!quiet_from_env(Some("0")));
        assert!(!quiet_from_env(Some("yes")));
        assert!(!quiet_from_env(None));
    }

    #[test]
    fn test_plain_theme_adds_no_escapes() {
        let plain = Theme::plain();
        assert_eq!("kg://ns".style(plain.key).to_string(), "kg://ns");
        let colored = Theme::colored();
        assert!("kg://ns".style(colored.key).to_string().contains('\u{1b}'));
    }
}
