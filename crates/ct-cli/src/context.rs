//! Everything a command needs, built once from the effective configuration

use anyhow::{Context as _, Result};
use std::sync::Arc;

use ct_core::config::ConfigFile;
use ct_core::Endpoint;
use ct_ledger::Ledger;
use ct_session::{OpenSshTransport, SessionManager, Transport};
use ct_tracking::{HttpTracker, Tracker};

/// Shared state for remote commands
pub struct AppContext<T: Transport> {
    pub config: ConfigFile,
    pub endpoint: Endpoint,
    pub sessions: SessionManager<T>,
    pub ledger: Ledger,
    /// `None` when no tracking credentials are configured
    pub tracker: Option<Arc<dyn Tracker>>,
}

impl AppContext<OpenSshTransport> {
    /// Context backed by the system ssh/rsync and the HTTP tracker
    pub fn from_config(config: ConfigFile) -> Result<Self> {
        let transport = Arc::new(OpenSshTransport::from_config(&config.session));
        let tracker = HttpTracker::from_config(&config.tracking)
            .context("Failed to initialise tracking client")?
            .map(|t| Arc::new(t) as Arc<dyn Tracker>);
        Self::new(config, transport, tracker)
    }
}

impl<T: Transport> AppContext<T> {
    /// Context over an explicit transport and tracker
    pub fn new(
        config: ConfigFile,
        transport: Arc<T>,
        tracker: Option<Arc<dyn Tracker>>,
    ) -> Result<Self> {
        let endpoint = config
            .endpoint()
            .context("No access point configured (set CHTC_HOST or [endpoint] host)")?;
        let sessions = SessionManager::with_shared_transport(transport, config.session.clone());
        let ledger = Ledger::from_config(&config.ledger);

        Ok(Self {
            config,
            endpoint,
            sessions,
            ledger,
            tracker,
        })
    }
}
