pub mod agent;
pub mod browser;
pub mod error;
pub mod pages;
pub mod recording;
pub mod server;

// Re-export commonly used items
pub use agent::{
    compress_history, ActionExecutor, ActionResult, AgentAction, AriaProvider, AuditLogger,
    BudgetController, BudgetLimits, CycleEntry, DomAriaProvider, FrameSampler, LoopConfig,
    LoopResult, PageSource, PerceptionLoop, RefResolver, SafetyConfig, SamplerConfig, TokenUsage,
    VisionClient,
};
pub use browser::{ChromeDriver, ConnectionMode, Viewport};
pub use error::StudioError;
pub use pages::console::{ConsoleLogEntry, LogLevel};
pub use pages::{PageEntry, PageRegistry};
pub use recording::{RecordingEngine, RecordingOptions, StopOutcome};
pub use server::AppState;
