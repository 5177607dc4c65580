//! Shared application state for Actix handlers.

use crate::config::ConfigStore;
use crate::supervisor::Supervisor;

pub(crate) struct AppState {
    pub supervisor: Supervisor,
    pub config: ConfigStore,
}
