//! Terminal progress: a spinner while operations are polled, and one line
//! per provisioning outcome.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use provision::{
    CreationOutcome, Detection, ExecutionError, OperationHandle, OperationWarning, PutOutcome,
    Reporter, ResourceDescriptor,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::ui;

/// Create a spinner with a message
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// [`Reporter`] that writes to the terminal.
pub struct TerminalReporter {
    spinner: Mutex<Option<ProgressBar>>,
    animate: bool,
}

impl TerminalReporter {
    pub fn new(animate: bool) -> Self {
        Self {
            spinner: Mutex::new(None),
            animate,
        }
    }

    /// Run `f` with the spinner out of the way.
    fn print(&self, f: impl FnOnce()) {
        let guard = match self.spinner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }

    /// Stop the spinner, if one is running.
    pub fn clear(&self) {
        let mut guard = match self.spinner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }
}

impl Reporter for TerminalReporter {
    fn on_probe(&self, desc: &ResourceDescriptor, exists: Option<bool>) {
        log::debug!("{}: exists={exists:?}", desc.label());
    }

    fn on_tolerated(&self, desc: &ResourceDescriptor, error: &ExecutionError) {
        log::info!(
            "{}: create reported a conflict: {}",
            desc.label(),
            ui::first_line(&error.stderr, 120)
        );
    }

    fn on_outcome(&self, desc: &ResourceDescriptor, outcome: &CreationOutcome) {
        let line = match outcome {
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Probe,
            } => format!("  {} {} already exists", "○".dimmed(), desc.label()),
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Conflict,
            } => format!(
                "  {} {} already exists {}",
                "○".dimmed(),
                desc.label(),
                "(reported by create)".dimmed()
            ),
            CreationOutcome::Created => format!("  {} {} created", "✓".green(), desc.label()),
            CreationOutcome::CreatedAsync(handle) => format!(
                "  {} {} creating {}",
                "→".cyan(),
                desc.label(),
                format!("({handle})").dimmed()
            ),
        };
        self.clear();
        println!("{line}");
    }

    fn on_poll(&self, handle: &OperationHandle, polls: u32, elapsed: Duration) {
        if !self.animate {
            return;
        }
        let msg = format!(
            "waiting for operation {handle} ({}s, {polls} checks)",
            elapsed.as_secs()
        );
        let mut guard = match self.spinner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(pb) => pb.set_message(msg),
            None => *guard = Some(spinner(&msg)),
        }
    }

    fn on_warning(&self, handle: &OperationHandle, warning: &OperationWarning) {
        self.print(|| ui::warn(&format!("operation {}: {warning}", handle.id)));
    }

    fn on_deletion_failed(&self, name: &str, error: &provision::Error) {
        self.print(|| {
            ui::warn(&format!(
                "could not delete secret '{name}' before recreating it; creating anyway"
            ));
            ui::dim(&error.to_string());
        });
    }

    fn on_secret(&self, name: &str, outcome: PutOutcome) {
        let verb = match outcome {
            PutOutcome::Created => "created",
            PutOutcome::Replaced => "replaced",
        };
        self.clear();
        println!("  {} secret '{name}' {verb}", "✓".green());
    }
}
