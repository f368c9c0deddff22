pub mod icons;
pub mod output;
pub mod progress;
pub mod progress_message;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    dim, error, failure, header, info, key, outcome, phase, section, status, success, summary_row, timings,
    warn,
};
pub use progress::{ProgressManager, Spinner};
pub use progress_message::{ProgressMessage, ProgressPhase};
pub use table::{report_table, stats_table, TableBuilder};
pub use theme::{configure, is_quiet, theme, ColorChoice, Theme, UiSettings};
