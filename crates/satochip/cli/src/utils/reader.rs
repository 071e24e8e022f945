use colored::Colorize;
use eyre::bail;
use satochip_apdu_transport_pcsc::{PcscDeviceManager, PcscReader};

/// Find a reader with a specific name
pub(crate) fn find_reader_by_name(
    manager: &PcscDeviceManager,
    reader_name: &str,
) -> eyre::Result<PcscReader> {
    manager
        .list_readers()?
        .into_iter()
        .find(|r| r.name() == reader_name)
        .ok_or_else(|| eyre::eyre!("Reader '{reader_name}' not found"))
}

/// Find the first reader whose card can be opened
pub(crate) fn find_reader_with_card(manager: &PcscDeviceManager) -> eyre::Result<PcscReader> {
    let readers = manager.list_readers()?;
    if readers.is_empty() {
        bail!("No readers found");
    }
    if let Some(reader) = readers.iter().find(|r| r.is_available()) {
        return Ok(reader.clone());
    }

    match readers.into_iter().find(PcscReader::has_card) {
        Some(busy) => bail!("Card is not usable: {busy}"),
        None => Err(eyre::eyre!("No card found in any reader")),
    }
}

/// Print every reader and whether it holds a card
pub(crate) fn list_readers(manager: &PcscDeviceManager) -> eyre::Result<()> {
    let readers = manager.list_readers()?;
    if readers.is_empty() {
        println!("No readers found");
        return Ok(());
    }

    println!("Available readers:");
    for (i, reader) in readers.iter().enumerate() {
        let line = if reader.is_available() {
            reader.to_string().green()
        } else if reader.has_card() {
            reader.to_string().yellow()
        } else {
            reader.to_string().dimmed()
        };
        println!("{}. {line}", i + 1);
    }
    Ok(())
}
