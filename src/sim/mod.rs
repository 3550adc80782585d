/// Forward-simulator command templating
pub mod command;

/// Forward-stage subprocess lifecycle
pub mod runner;

/// Ancestral demography events and their construction
pub mod demography;

/// Backward-time coalescent completion and mutation overlay
pub mod recapitate;

/// Present-day sampling and tree-sequence summaries
pub mod sample;
