//! Device manager for PC/SC operations

use std::ffi::CString;
use std::time::{Duration, Instant};

use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, info};

use crate::config::{ConnectStrategy, PcscConfig};
use crate::error::PcscError;
use crate::reader::PcscReader;
use crate::transport::PcscTransport;

/// Manager for PC/SC device operations
#[allow(missing_debug_implementations)]
pub struct PcscDeviceManager {
    /// PC/SC context
    context: Context,
}

impl PcscDeviceManager {
    /// Create a new PC/SC device manager
    pub fn new() -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        let names = self.reader_names()?;
        if names.is_empty() {
            return Err(PcscError::NoReadersAvailable);
        }

        let mut states: Vec<ReaderState> = names
            .iter()
            .map(|name| ReaderState::new(name.as_c_str(), State::UNAWARE))
            .collect();

        match self.context.get_status_change(Duration::ZERO, &mut states) {
            Ok(()) => Ok(states.iter().map(PcscReader::from_reader_state).collect()),
            // Without a status we can still report the readers themselves
            Err(_) => Ok(names
                .iter()
                .map(|name| PcscReader::unknown(name.to_string_lossy().into_owned()))
                .collect()),
        }
    }

    /// Scan for readers holding a card, waiting up to `timeout` for one to be inserted
    ///
    /// The scan runs on its own PC/SC context and never touches an open
    /// session. An empty result means no card showed up in time.
    pub fn discover(&self, timeout: Duration) -> Result<Vec<PcscReader>, PcscError> {
        let context = Context::establish(Scope::User)?;
        let deadline = Instant::now() + timeout;

        let names = match context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if names.is_empty() {
            debug!("No PC/SC readers attached");
            return Ok(Vec::new());
        }

        let mut states: Vec<ReaderState> = names
            .iter()
            .map(|name| ReaderState::new(name.as_c_str(), State::UNAWARE))
            .collect();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match context.get_status_change(remaining, &mut states) {
                Ok(()) => {}
                Err(pcsc::Error::Timeout) => {
                    debug!(?timeout, "Discovery timed out without a card");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e.into()),
            }

            let readers: Vec<PcscReader> =
                states.iter().map(PcscReader::from_reader_state).collect();
            if readers.iter().any(PcscReader::has_card) {
                info!(
                    count = readers.iter().filter(|r| r.has_card()).count(),
                    "Discovered card"
                );
                return Ok(readers.into_iter().filter(PcscReader::has_card).collect());
            }

            if remaining.is_zero() {
                return Ok(Vec::new());
            }

            for state in &mut states {
                state.sync_current_state();
            }
        }
    }

    /// Open a connection to a specific reader
    pub fn open_reader(&self, reader_name: &str) -> Result<PcscTransport, PcscError> {
        self.open_reader_with_config(reader_name, PcscConfig::default())
    }

    /// Open a connection to a specific reader with custom configuration
    pub fn open_reader_with_config(
        &self,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<PcscTransport, PcscError> {
        if CString::new(reader_name).is_err() {
            return Err(PcscError::ReaderNotFound(reader_name.to_string()));
        }
        PcscTransport::new(self.context.clone(), reader_name, config)
    }

    /// Connect to a reader using the specified strategy
    pub fn connect_strategy(
        &self,
        strategy: ConnectStrategy,
        config: PcscConfig,
    ) -> Result<PcscTransport, PcscError> {
        match strategy {
            ConnectStrategy::Reader(name) => self.open_reader_with_config(&name, config),
            ConnectStrategy::AnyCard => {
                let readers = self.list_readers()?;
                let reader = readers
                    .iter()
                    .find(|reader| reader.has_card())
                    .ok_or_else(|| PcscError::NoCard("no reader with a card".to_string()))?;
                self.open_reader_with_config(reader.name(), config)
            }
            ConnectStrategy::FirstAvailable => {
                let readers = self.list_readers()?;
                let reader = readers.first().ok_or(PcscError::NoReadersAvailable)?;
                self.open_reader_with_config(reader.name(), config)
            }
        }
    }

    fn reader_names(&self) -> Result<Vec<CString>, PcscError> {
        match self.context.list_readers_owned() {
            Ok(names) => Ok(names),
            Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
