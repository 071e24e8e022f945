//! PC/SC readers as seen when choosing where the wallet card sits

use std::fmt;

use pcsc::{ReaderState, State};

/// A PC/SC card reader and what it reported about its slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcscReader {
    name: String,
    slot: SlotState,
    /// Answer To Reset, only kept while a card is present
    atr: Option<Vec<u8>>,
}

/// What the reader reports about its card slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotState {
    /// A card is inserted
    pub present: bool,
    /// The card did not answer the reset
    pub mute: bool,
    /// Another application holds the card exclusively
    pub exclusive: bool,
}

impl From<State> for SlotState {
    fn from(state: State) -> Self {
        Self {
            present: state.contains(State::PRESENT) && !state.contains(State::EMPTY),
            mute: state.contains(State::MUTE),
            exclusive: state.contains(State::EXCLUSIVE),
        }
    }
}

impl PcscReader {
    /// Reader without any slot information, as listed before a status query
    pub const fn unknown(name: String) -> Self {
        Self {
            name,
            slot: SlotState {
                present: false,
                mute: false,
                exclusive: false,
            },
            atr: None,
        }
    }

    /// Reader with a known slot state; the ATR is dropped when no card is present
    pub fn new(name: String, slot: SlotState, atr: Option<Vec<u8>>) -> Self {
        Self {
            name,
            slot,
            atr: atr.filter(|_| slot.present),
        }
    }

    /// Reader name as PC/SC reports it
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a card is inserted
    pub const fn has_card(&self) -> bool {
        self.slot.present
    }

    /// Whether the inserted card can be opened now
    ///
    /// False for mute cards and cards held exclusively by another
    /// application, such as a running wallet.
    pub const fn is_available(&self) -> bool {
        self.slot.present && !self.slot.mute && !self.slot.exclusive
    }

    /// Slot state at listing time
    pub const fn slot(&self) -> SlotState {
        self.slot
    }

    /// ATR of the inserted card
    pub fn atr(&self) -> Option<&[u8]> {
        self.atr.as_deref()
    }

    pub(crate) fn from_reader_state(reader_state: &ReaderState) -> Self {
        let slot = SlotState::from(reader_state.event_state());
        Self::new(
            reader_state.name().to_string_lossy().into_owned(),
            slot,
            Some(reader_state.atr().to_vec()),
        )
    }
}

impl fmt::Display for PcscReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.slot.present {
            write!(f, " (no card)")
        } else if self.slot.mute {
            write!(f, " (card not responding)")
        } else if self.slot.exclusive {
            write!(f, " (card in use by another application)")
        } else if let Some(atr) = &self.atr {
            write!(f, " (card present, ATR {})", hex::encode(atr))
        } else {
            write!(f, " (card present)")
        }
    }
}
