/// Globals handed to runs started by a dynamic load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadGlobals {
  /// Same globals as the entry run.
  #[default]
  Inherit,
  /// No globals.
  Empty,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
  pub load_globals: LoadGlobals,
}
