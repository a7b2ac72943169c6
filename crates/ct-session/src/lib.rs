//! ct-session: Persistent authenticated channel to a cluster access point
//!
//! The access point requires an interactive password plus second factor,
//! so authenticating per command is not an option. [`SessionManager`]
//! authenticates once per endpoint and ttl window, records the resulting
//! master channel on disk, and runs every later command, transfer and
//! shell as a secondary stream over it, from this process or any other.
//!
//! ```no_run
//! use ct_core::config::SessionConfig;
//! use ct_core::Endpoint;
//! use ct_session::{OpenSshTransport, SessionManager};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), ct_core::SessionError> {
//! let config = SessionConfig::default();
//! let manager = SessionManager::new(OpenSshTransport::from_config(&config), config);
//! let endpoint = Endpoint::new("ap2002.chtc.wisc.edu", "bucky", 22);
//!
//! manager.connect(&endpoint).await?;
//! let out = manager
//!     .execute(&endpoint, &["condor_q".to_string()], Duration::from_secs(30))
//!     .await?;
//! println!("{}", out.stdout);
//! # Ok(())
//! # }
//! ```

mod manager;
pub mod marker;
pub mod session;
pub mod transport;

pub use manager::SessionManager;
pub use marker::{ControlPaths, MarkerStore, SessionMarker};
pub use session::{
    CommandOutput, ConnectOutcome, Connection, Session, SessionStatus, StaleReason,
    TransferReport,
};
pub use transport::{
    ChannelHandle, Direction, ExecOutput, OpenSshTransport, TransferSpec, Transport,
    TransportError,
};

#[cfg(any(test, feature = "test-util"))]
pub use transport::scripted::ScriptedTransport;
