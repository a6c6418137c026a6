//! `streambot authorize-url <bot|caster>` - print an authorization URL.

use anyhow::Result;

use crate::auth::{CredentialStore, IdentityKind};
use crate::config::Config;

/// Prints the provider authorization URL for `kind`.
///
/// The `state` embedded in the URL is only remembered by this process, so
/// completing the flow needs a running `streambot start` that issued its own
/// URL. This command is for checking client id, redirect and scope settings.
pub fn url(kind: IdentityKind) -> Result<()> {
    let config = Config::load()?;
    let store = CredentialStore::from_config(&config, kind);
    let url = store.authorization_url()?;
    println!("{url}");
    Ok(())
}
