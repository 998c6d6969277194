//! Terminal progress for running workflows

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;

use crate::workflow::{FlowObserver, FlowStep};

/// Shows one spinner per running step
#[derive(Default)]
pub struct SpinnerObserver {
    current: Mutex<Option<ProgressBar>>
}

impl SpinnerObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl FlowObserver for SpinnerObserver {
    fn on_step_started(&self, step: FlowStep) {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(Self::spinner_style());
        spinner.set_message(format!("{} ...", step.description()));
        spinner.enable_steady_tick(Duration::from_millis(100));

        if let Some(previous) = self.current.lock().replace(spinner) {
            previous.finish_and_clear();
        }
    }

    fn on_step_completed(&self, step: FlowStep, succeeded: bool) {
        if let Some(spinner) = self.current.lock().take() {
            let mark = if succeeded { "✔" } else { "✘" };
            spinner.finish_with_message(format!("{} {}", mark, step.description()));
        }
    }
}
