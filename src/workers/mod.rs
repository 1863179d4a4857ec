pub mod fragment_session;
pub mod reconciliation;

pub use fragment_session::{FragmentSessionWorker, SessionKeeperConfig};
pub use reconciliation::{ReconciliationConfig, ReconciliationReport, ReconciliationWorker};
