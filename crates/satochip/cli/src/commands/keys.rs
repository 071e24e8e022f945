//! Commands that derive keys and sign

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use eyre::WrapErr;
use parking_lot::Mutex;
use satochip::{KeyPath, Keystore, XpubType};
use satochip_apdu_transport_pcsc::PcscTransport;

use crate::config::Config;
use crate::utils;

fn keystore(
    transport: PcscTransport,
    config: &Config,
    pin: Option<&str>,
) -> eyre::Result<Keystore<PcscTransport>> {
    let mut session = utils::open_session(transport)?;
    utils::unlock(&mut session, pin)?;
    Ok(Keystore::new(
        Arc::new(Mutex::new(session)),
        config.keystore_config()?,
    ))
}

/// Export an extended public key
pub(crate) fn xpub_command(
    transport: PcscTransport,
    config: &Config,
    pin: Option<&str>,
    path: Option<&str>,
    xtype: Option<&str>,
) -> eyre::Result<()> {
    let path: KeyPath = match path {
        Some(path) => path
            .parse()
            .wrap_err_with(|| format!("invalid derivation path {path:?}"))?,
        None => config.keystore_config()?.account_path,
    };
    let xtype: XpubType = match xtype {
        Some(xtype) => xtype.parse()?,
        None => config.xpub_type()?,
    };

    let keystore = keystore(transport, config, pin)?;
    println!("{}", keystore.xpub(&path, xtype)?);
    Ok(())
}

/// Sign a message with an address key
///
/// Prints the compact signature in base64, the form wallets verify.
pub(crate) fn sign_message_command(
    transport: PcscTransport,
    config: &Config,
    pin: Option<&str>,
    message: &str,
    address: (u32, u32),
) -> eyre::Result<()> {
    let keystore = keystore(transport, config, pin)?;
    let signature = keystore.sign_message(address, message.as_bytes())?;
    println!("{}", STANDARD.encode(signature));
    Ok(())
}
