use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{failed, heading, passed, pending};

/// Spinner for one phase of a comparison run, drawn on stderr.
pub struct PhaseProgress {
    pb: ProgressBar,
    label: String,
}

impl PhaseProgress {
    /// Prints the phase list header.
    pub fn header() {
        eprintln!("{}  {}", heading("⚙️"), heading("Phases").underlined());
    }

    /// Starts phase `index` of `total`, e.g. "Phase 1/2: Comparing configurations".
    pub fn start(index: usize, total: usize, description: &str) -> Self {
        let label = format!("Phase {index}/{total}: {description}");
        let pb = create_spinner(pending(&label).to_string());
        Self { pb, label }
    }

    pub fn finish(self) {
        self.pb
            .finish_with_message(passed(format!("{} ✓", self.label)).to_string());
    }

    pub fn fail(self) {
        self.pb
            .finish_with_message(failed(format!("{} ✗", self.label)).to_string());
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
