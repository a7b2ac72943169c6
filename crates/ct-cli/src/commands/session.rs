//! connect / status / disconnect

use anyhow::Result;

use ct_session::{ConnectOutcome, Transport};

use crate::context::AppContext;
use crate::output::{format_duration, format_session, print_info, print_success};

/// Establish (or join) the shared channel
pub async fn connect_command<T: Transport>(ctx: &AppContext<T>, replace: bool) -> Result<()> {
    let connection = if replace {
        ctx.sessions.connect_replace(&ctx.endpoint).await?
    } else {
        ctx.sessions.connect(&ctx.endpoint).await?
    };

    let ttl = format_duration(connection.session.ttl);
    match connection.outcome {
        ConnectOutcome::Reused => {
            print_info(&format!("Already connected to {}", ctx.endpoint));
        }
        ConnectOutcome::Established | ConnectOutcome::Reestablished => {
            print_success(&format!(
                "Connected to {}; commands reuse this channel for {}",
                ctx.endpoint, ttl
            ));
        }
    }
    Ok(())
}

/// Report the channel's state without changing it
pub async fn status_command<T: Transport>(ctx: &AppContext<T>) -> Result<()> {
    let status = ctx.sessions.status(&ctx.endpoint).await?;
    let session = ctx.sessions.describe(&ctx.endpoint)?;
    print!("{}", format_session(&ctx.endpoint, &status, session.as_ref()));
    Ok(())
}

/// Close the channel; a no-op when none exists
pub async fn disconnect_command<T: Transport>(ctx: &AppContext<T>) -> Result<()> {
    if ctx.sessions.disconnect(&ctx.endpoint).await? {
        print_success(&format!("Disconnected from {}", ctx.endpoint));
    } else {
        print_info(&format!("No channel to {}", ctx.endpoint));
    }
    Ok(())
}
