/// Run one full two-stage simulation and print its summary
pub mod simulate;

/// Parameter-sweep batch driver over a prior table
pub mod sweep;
