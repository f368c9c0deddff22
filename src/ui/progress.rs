use crate::import::ImportReport;
use crate::ui::progress_message::{ProgressMessage, ProgressPhase};
use crate::ui::theme;
use crate::ui::Icons;
use indicatif::{HumanDuration, MultiProgress, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::thread;
use std::time::Duration;

const BAR_TEMPLATE: &str = "{spinner} {msg:<20} [{bar:30}] {pos}/{len}";

fn phases() -> [ProgressPhase; 6] {
    [
        ProgressPhase::Loading,
        ProgressPhase::Embedding,
        ProgressPhase::Documents,
        ProgressPhase::Entities,
        ProgressPhase::Relations,
        ProgressPhase::Verifying,
    ]
}

/// One progress bar per import phase, fed from the orchestrator's channel
pub struct ProgressManager {
    mp: MultiProgress,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressManager {
    pub fn new() -> (Self, crossbeam::channel::Sender<ProgressMessage>) {
        let (tx, rx) = crossbeam::channel::unbounded::<ProgressMessage>();

        let mp = MultiProgress::new();
        let is_term = console::Term::stdout().is_term();
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let bars: Vec<(ProgressPhase, ProgressBar)> = phases()
            .into_iter()
            .map(|phase| {
                let bar = if is_term {
                    mp.add(ProgressBar::new(0).with_style(style.clone()).with_message(phase.label()))
                } else {
                    ProgressBar::hidden()
                };
                (phase, bar)
            })
            .collect();

        let handle = thread::spawn(move || {
            let bar_for = |phase: ProgressPhase| bars.iter().find(|(p, _)| *p == phase).map(|(_, bar)| bar);

            for msg in rx {
                match msg {
                    ProgressMessage::Started { phase, total } => {
                        if let Some(bar) = bar_for(phase) {
                            bar.set_length(total as u64);
                            bar.enable_steady_tick(Duration::from_millis(100));
                        }
                    }
                    ProgressMessage::Progress { phase, current, item } => {
                        if let Some(bar) = bar_for(phase) {
                            bar.set_position(current as u64);
                            if let Some(item) = item {
                                bar.set_message(format!("{}: {}", phase.label(), item));
                            }
                        }
                    }
                    ProgressMessage::Finished { phase } => {
                        if let Some(bar) = bar_for(phase) {
                            bar.finish_with_message(format!("{} done", phase.label()));
                        }
                    }
                    ProgressMessage::RecordFailed(message) | ProgressMessage::Warning(message) => {
                        tracing::debug!("{}", message);
                    }
                }
            }
        });

        (Self { mp, handle: Some(handle) }, tx)
    }

    pub fn clear(&self) {
        self.mp.clear().ok();
    }

    /// Wait for the renderer to drain; all senders must be dropped first
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }

    pub fn finish_with_summary(&mut self, duration: Duration, report: &ImportReport) {
        self.join();
        self.clear();
        println!();
        println!(
            "{} {}",
            Icons::CHECK.style(theme().success.clone()),
            format!("Import finished in {}", HumanDuration(duration)).style(theme().success.clone())
        );
        println!(
            "  {} {}  {} {}  {} {}  {} {}",
            Icons::FILE.style(theme().info.clone()),
            report.source.documents,
            Icons::PACKAGE.style(theme().info.clone()),
            report.source.entities,
            Icons::LINK.style(theme().info.clone()),
            report.source.relations,
            Icons::BRAIN.style(theme().info.clone()),
            report.embedded.total()
        );
    }
}

pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        if console::Term::stdout().is_term() {
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        Self { pb }
    }

    pub fn set_message(&self, msg: &str) {
        self.pb.set_message(msg.to_string());
    }

    pub fn finish_with_message(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }
}
