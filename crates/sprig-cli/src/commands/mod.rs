pub mod browser;
pub mod completions;
pub mod doctor;
pub mod down;
pub mod finish;
pub mod list;
pub mod man_pages;
pub mod migrate;
pub mod up;

use indicatif::{ProgressBar, ProgressStyle};
use sprig_core::{
    select_tracker, state_dir, Adapters, CoreError, Event, Git, IssueTracker, Observer,
    Orchestrator, StepStatus, Vcs,
};
use sprig_schema::Config;
use std::cell::RefCell;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

const CONFIG_PREFIXES: &[&str] = &[
    "configuration error:",
    "failed to parse config",
    "failed to read config",
    "invalid environment name",
];

pub fn is_configuration_message(msg: &str) -> bool {
    CONFIG_PREFIXES.iter().any(|p| msg.starts_with(p))
}

/// Render a core error for `main`, which picks the exit code from the
/// message prefix.
pub fn describe(e: &CoreError) -> String {
    let msg = e.to_string();
    if e.is_configuration() && !is_configuration_message(&msg) {
        format!("configuration error: {msg}")
    } else {
        msg
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// The repository, its configuration and tracker, loaded once per invocation.
pub struct Project {
    pub config: Config,
    pub vcs: Git,
    pub tracker: Box<dyn IssueTracker>,
    /// Checkout sprig was started from.
    pub checkout: PathBuf,
}

impl Project {
    pub fn open(dir: &Path) -> Result<Self, String> {
        let vcs = Git::discover(dir).map_err(|e| describe(&e))?;
        let config = Config::load(vcs.main_root()).map_err(|e| describe(&CoreError::from(e)))?;
        let tracker =
            select_tracker(config.tracker_backend(), config.root()).map_err(|e| describe(&e))?;
        let checkout = Git::toplevel(dir).unwrap_or_else(|_| config.root().to_path_buf());
        debug!(
            "project '{}' at {}, started from {}",
            config.project_name(),
            config.root().display(),
            checkout.display()
        );
        Ok(Self {
            config,
            vcs,
            tracker,
            checkout,
        })
    }

    pub fn orchestrator<'a>(&'a self, observer: &'a dyn Observer) -> Result<Orchestrator<'a>, String> {
        let state = state_dir(&self.vcs).map_err(|e| describe(&e))?;
        let adapters = Adapters::from_config(&self.config, &state).map_err(|e| describe(&e))?;
        let orchestrator = Orchestrator::new(
            &self.config,
            &self.vcs,
            self.tracker.as_ref(),
            adapters,
            observer,
        )
        .map_err(|e| describe(&e))?;
        Ok(orchestrator.with_source(self.checkout.clone()))
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish_with(pb: &ProgressBar, line: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(line);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish_with(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish_with(pb, format!("✗ {msg}"));
}

pub fn spin_warn(pb: &ProgressBar, msg: &str) {
    finish_with(pb, format!("⚠ {msg}"));
}

pub fn spin_skip(pb: &ProgressBar, msg: &str) {
    finish_with(pb, console::style(format!("- {msg}")).dim().to_string());
}

pub fn colorize_presence(exists: Option<bool>) -> String {
    use console::Style;
    match exists {
        Some(true) => Style::new().green().apply_to("present").to_string(),
        Some(false) => Style::new().red().apply_to("missing").to_string(),
        None => Style::new().dim().apply_to("unknown").to_string(),
    }
}

/// Renders orchestrator events as spinners on stdout. With `quiet` only
/// warnings are shown, on stderr.
pub struct Progress {
    quiet: bool,
    current: RefCell<Option<ProgressBar>>,
}

impl Progress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            current: RefCell::new(None),
        }
    }

    fn take(&self) -> Option<ProgressBar> {
        self.current.borrow_mut().take()
    }
}

impl Observer for Progress {
    fn event(&self, event: &Event) {
        if self.quiet {
            if let Event::Warning(msg) = event {
                eprintln!("warning: {msg}");
            }
            return;
        }
        match event {
            Event::Step { step, status } => match status {
                StepStatus::Started => {
                    if let Some(pb) = self.take() {
                        pb.finish_and_clear();
                    }
                    *self.current.borrow_mut() = Some(spinner(step.label()));
                }
                StepStatus::Done(detail) => {
                    let line = match detail {
                        Some(d) => format!("{step} ({d})"),
                        None => step.to_string(),
                    };
                    match self.take() {
                        Some(pb) => spin_ok(&pb, &line),
                        None => println!("✓ {line}"),
                    }
                }
                StepStatus::Skipped(reason) => {
                    let line = format!("{step} skipped: {reason}");
                    match self.take() {
                        Some(pb) => spin_skip(&pb, &line),
                        None => println!("- {line}"),
                    }
                }
                StepStatus::Warning(msg) => {
                    let line = format!("{step}: {msg}");
                    match self.take() {
                        Some(pb) => spin_warn(&pb, &line),
                        None => println!("⚠ {line}"),
                    }
                }
                StepStatus::Failed(msg) => {
                    let line = format!("{step}: {msg}");
                    match self.take() {
                        Some(pb) => spin_fail(&pb, &line),
                        None => println!("✗ {line}"),
                    }
                }
            },
            Event::Undo(what) => println!("  ↺ rollback: {what}"),
            Event::Removed(what) => println!("✓ removed {what}"),
            Event::Warning(msg) => eprintln!("warning: {msg}"),
            Event::Title(title) => set_terminal_title(title),
        }
    }
}

fn set_terminal_title(title: &str) {
    let mut out = std::io::stdout();
    if out.is_terminal() {
        let _ = write!(out, "\x1b]0;{title}\x07");
        let _ = out.flush();
    }
}
