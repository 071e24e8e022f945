//! Commands for card status and provisioning

use colored::Colorize;
use satochip::{DeviceStatus, Provisioner};
use satochip_apdu_transport_pcsc::PcscTransport;
use tracing::info;

use crate::utils::{self, prompt::TerminalHandler};

fn yes_no(value: bool) -> colored::ColoredString {
    if value { "yes".green() } else { "no".normal() }
}

fn print_status(status: &DeviceStatus) {
    println!("Protocol version: {}", status.protocol_version);
    println!("Applet version:   {}", status.applet_version);
    println!("PIN tries left:   {}", status.pin0_remaining);
    println!("PUK tries left:   {}", status.puk0_remaining);
    println!("Seeded:           {}", yes_no(status.is_seeded));
    println!("2FA enabled:      {}", yes_no(status.needs_2fa));
    if let Some(mismatch) = status.version_check().warning() {
        println!(
            "{} card protocol {} differs from supported {}",
            "Warning:".yellow().bold(),
            mismatch.card,
            mismatch.supported
        );
    }
}

/// Show the card status
pub(crate) fn status_command(transport: PcscTransport) -> eyre::Result<()> {
    let mut session = utils::open_session(transport)?;
    match session.get_status()? {
        Some(status) => print_status(&status),
        None => println!("{}", "Card is not set up yet; run `satochip setup`".yellow()),
    }
    Ok(())
}

/// Run the interactive provisioning workflow
pub(crate) fn setup_command(transport: PcscTransport) -> eyre::Result<()> {
    let mut session = utils::open_session(transport)?;
    let mut handler = TerminalHandler;
    let authentikey = Provisioner::new(&mut session, &mut handler).run()?;

    info!("Provisioning complete");
    println!("{}", "Card is ready".green().bold());
    println!(
        "Authentikey: {}",
        hex::encode(authentikey.to_encoded_point(true).as_bytes())
    );
    Ok(())
}

/// Print the card's authentikey
pub(crate) fn authentikey_command(
    transport: PcscTransport,
    pin: Option<&str>,
) -> eyre::Result<()> {
    let mut session = utils::open_session(transport)?;
    utils::unlock(&mut session, pin)?;
    let authentikey = session.authentikey()?;
    println!(
        "{}",
        hex::encode(authentikey.to_encoded_point(true).as_bytes())
    );
    Ok(())
}
