pub mod ids;
pub mod report;
pub mod script;
pub mod settings;

pub use ids::RunId;
pub use report::*;
pub use script::*;
pub use settings::*;

/// Name bound to `__name__` in a script's globals when it runs as the entry point.
pub const MAIN_MODULE_NAME: &str = "__main__";
