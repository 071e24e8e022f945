use bytes::BufMut;
use satochip_apdu_core::{
    ApduCommand, ApduResponse, CommandError, Error as ApduError, Response,
    command::MAX_DATA_LENGTH,
};
use zeroize::Zeroizing;

use crate::constants::{CLA_SATOCHIP, OPTION_FLAG_2FA, TWO_FA_SECRET_LENGTH, ins, sw};

/// Default PIN used by the card before SETUP
const DEFAULT_PIN: &[u8; 8] = b"Muscle00";

/// 2FA enrolment carried by SETUP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorSetup {
    /// Shared secret with the second device
    pub secret: Zeroizing<[u8; TWO_FA_SECRET_LENGTH]>,
    /// Amount above which 2FA is required; zero means always
    pub amount_limit: u64,
}

/// Parameters for the one-time card SETUP
#[derive(Debug, Clone)]
pub struct SetupParams {
    /// Tries for the user PIN
    pub pin_tries0: u8,
    /// Tries for the user PUK
    pub ublk_tries0: u8,
    /// User PIN
    pub pin0: Zeroizing<Vec<u8>>,
    /// User PUK
    pub ublk0: Zeroizing<Vec<u8>>,
    /// Tries for the second PIN
    pub pin_tries1: u8,
    /// Tries for the second PUK
    pub ublk_tries1: u8,
    /// Second PIN
    pub pin1: Zeroizing<Vec<u8>>,
    /// Second PUK
    pub ublk1: Zeroizing<Vec<u8>>,
    /// Secure memory size
    pub secmemsize: u16,
    /// Object memory size
    pub memsize: u16,
    /// ACL for object creation
    pub create_object_acl: u8,
    /// ACL for key creation
    pub create_key_acl: u8,
    /// ACL for PIN creation
    pub create_pin_acl: u8,
    /// Optional 2FA enrolment
    pub two_factor: Option<TwoFactorSetup>,
}

impl SetupParams {
    /// Standard parameters around a user PIN
    ///
    /// PUKs and the second PIN are random and never shown; the card is
    /// effectively single-PIN.
    pub fn with_pin(pin: &[u8]) -> Self {
        Self {
            pin_tries0: 5,
            ublk_tries0: 1,
            pin0: Zeroizing::new(pin.to_vec()),
            ublk0: Zeroizing::new(rand::random::<[u8; 16]>().to_vec()),
            pin_tries1: 1,
            ublk_tries1: 1,
            pin1: Zeroizing::new(rand::random::<[u8; 16]>().to_vec()),
            ublk1: Zeroizing::new(rand::random::<[u8; 16]>().to_vec()),
            secmemsize: 32,
            memsize: 0,
            create_object_acl: 0x01,
            create_key_acl: 0x01,
            create_pin_acl: 0x01,
            two_factor: None,
        }
    }

    /// Enrol a 2FA secret
    pub fn with_two_factor(
        mut self,
        secret: [u8; TWO_FA_SECRET_LENGTH],
        amount_limit: u64,
    ) -> Self {
        self.two_factor = Some(TwoFactorSetup {
            secret: Zeroizing::new(secret),
            amount_limit,
        });
        self
    }
}

/// SETUP command
#[derive(Debug, Clone)]
pub struct SetupCommand {
    data: Zeroizing<Vec<u8>>,
}

impl SetupCommand {
    /// Encode the SETUP data field
    ///
    /// The buffer is sized up front so the PINs are never left behind in a
    /// reallocated copy.
    pub fn with_params(params: &SetupParams) -> Result<Self, CommandError> {
        let two_factor_len = params
            .two_factor
            .as_ref()
            .map_or(0, |_| 2 + TWO_FA_SECRET_LENGTH + 8);
        let len = 1 + DEFAULT_PIN.len()
            + 2 + lv_len(&params.pin0)? + lv_len(&params.ublk0)?
            + 2 + lv_len(&params.pin1)? + lv_len(&params.ublk1)?
            + 7 + two_factor_len;
        if len > MAX_DATA_LENGTH {
            return Err(CommandError::data_too_long(len, MAX_DATA_LENGTH));
        }

        let mut data = Zeroizing::new(Vec::with_capacity(len));
        put_lv(&mut data, DEFAULT_PIN);

        data.put_u8(params.pin_tries0);
        data.put_u8(params.ublk_tries0);
        put_lv(&mut data, &params.pin0);
        put_lv(&mut data, &params.ublk0);

        data.put_u8(params.pin_tries1);
        data.put_u8(params.ublk_tries1);
        put_lv(&mut data, &params.pin1);
        put_lv(&mut data, &params.ublk1);

        data.put_u16(params.secmemsize);
        data.put_u16(params.memsize);
        data.put_u8(params.create_object_acl);
        data.put_u8(params.create_key_acl);
        data.put_u8(params.create_pin_acl);

        if let Some(two_factor) = &params.two_factor {
            data.put_u16(OPTION_FLAG_2FA);
            data.extend_from_slice(two_factor.secret.as_ref());
            data.put_u64(two_factor.amount_limit);
        }

        Ok(Self { data })
    }
}

fn lv_len(value: &[u8]) -> Result<usize, CommandError> {
    if value.len() > usize::from(u8::MAX) {
        return Err(CommandError::InvalidParameter("PIN longer than 255 bytes"));
    }
    Ok(1 + value.len())
}

// Lengths are checked by `lv_len` before anything is written
fn put_lv(data: &mut Vec<u8>, value: &[u8]) {
    data.put_u8(value.len() as u8);
    data.extend_from_slice(value);
}

/// SETUP success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOk {
    /// Card is set up
    Done,
}

/// SETUP failures
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// SETUP was already run
    #[error("Card setup already done")]
    AlreadyDone,

    /// The card rejected a parameter
    #[error("Invalid setup parameter")]
    InvalidParameter,

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for SetupCommand {
    type Success = SetupOk;
    type Error = SetupError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::SETUP
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS => Ok(SetupOk::Done),
            sw::SETUP_ALREADY_DONE => Err(SetupError::AlreadyDone),
            sw::INVALID_PARAMETER => Err(SetupError::InvalidParameter),
            status => Err(SetupError::Unknown {
                sw1: status.sw1,
                sw2: status.sw2,
            }),
        }
    }
}
