//! Helpers shared by the commands

pub(crate) mod prompt;
pub(crate) mod reader;

use eyre::OptionExt;
use satochip::{CardSession, validate_pin};
use satochip_apdu_transport_pcsc::PcscTransport;
use tracing::debug;
use zeroize::Zeroizing;

pub(crate) type Session = CardSession<PcscTransport>;

/// Select the applet on `transport`
pub(crate) fn open_session(transport: PcscTransport) -> eyre::Result<Session> {
    debug!(reader = transport.reader_name(), "Opening session");
    Ok(CardSession::open(transport)?)
}

/// Verify the PIN given on the command line, or ask for it
pub(crate) fn unlock(session: &mut Session, pin: Option<&str>) -> eyre::Result<()> {
    let pin = match pin {
        Some(pin) => Zeroizing::new(pin.to_string()),
        None => Zeroizing::new(prompt::input("Enter PIN").ok_or_eyre("no PIN given")?),
    };
    session.set_pin(validate_pin(&pin)?);
    session.verify_pin()?;
    Ok(())
}
