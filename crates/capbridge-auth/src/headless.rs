//! Headless-environment detection.
//!
//! A pure predicate over a snapshot of environment signals, used only to
//! select the device flow over an interactive redirect flow. Taking the
//! snapshot ([`EnvironmentSignals::from_env`]) is the only side-effecting
//! step; the predicate itself has none.

use std::path::Path;

/// Snapshot of the environment signals relevant to flow selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSignals {
    /// An X11 display session is present (`DISPLAY`).
    pub display: bool,
    /// A Wayland session is present (`WAYLAND_DISPLAY`).
    pub wayland_display: bool,
    /// The process runs over SSH (`SSH_CONNECTION` or `SSH_TTY`).
    pub ssh: bool,
    /// A CI marker is set (`CI`).
    pub ci: bool,
    /// A container marker is present (`/.dockerenv` or `container` env var).
    pub container: bool,
    /// Explicit operator override; wins over every other signal.
    pub override_headless: Option<bool>,
}

impl EnvironmentSignals {
    /// Capture the current process environment.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).is_ok_and(|v| !v.is_empty());
        Self {
            display: non_empty("DISPLAY"),
            wayland_display: non_empty("WAYLAND_DISPLAY"),
            ssh: non_empty("SSH_CONNECTION") || non_empty("SSH_TTY"),
            ci: non_empty("CI"),
            container: non_empty("container") || Path::new("/.dockerenv").exists(),
            override_headless: std::env::var("CAPBRIDGE_HEADLESS")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        }
    }

    /// Whether the device flow should be selected over an interactive
    /// redirect flow.
    pub fn is_headless(&self) -> bool {
        if let Some(forced) = self.override_headless {
            return forced;
        }
        self.ci || self.container || self.ssh || (!self.display && !self.wayland_display)
    }
}
