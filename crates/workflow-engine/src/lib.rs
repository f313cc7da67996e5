pub mod menu;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;

pub use menu::{run_menu, MenuAction};
pub use orchestrator::{
    DriverSyncReport, FileAction, FileOutcome, UpdateOrchestrator, UpdateSummary,
};
pub use pipeline::{EspPipeline, PreparedEsp, Selection, ValidatedEsp};
pub use prompt::Prompt;
