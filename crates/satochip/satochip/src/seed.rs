//! Seed phrases accepted by the provisioning workflow
//!
//! New seeds are Electrum "standard" phrases or BIP39 mnemonics. Restoration
//! also accepts Electrum "segwit" seeds; Electrum 2FA seeds and pre-2.0 seeds
//! are refused because the card cannot reproduce their key trees.

use coins_bip39::{English, Mnemonic, Wordlist};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::Sha512;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use zeroize::Zeroizing;

/// Words in a newly generated mnemonic
pub const NEW_MNEMONIC_WORDS: usize = 12;

const ELECTRUM_PBKDF2_ROUNDS: u32 = 2048;

/// Seed phrase errors
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// Not a valid BIP39 mnemonic
    #[error("invalid BIP39 mnemonic: {0}")]
    InvalidMnemonic(#[from] coins_bip39::MnemonicError),

    /// A seed type the card cannot use
    #[error("unsupported seed type: {0}")]
    Unsupported(&'static str),
}

/// How a phrase is generated or interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedFormat {
    /// BIP39 mnemonic
    Bip39,
    /// Electrum seed phrase
    Electrum,
}

/// Electrum seed versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectrumSeedType {
    /// P2PKH wallets
    Standard,
    /// Native segwit wallets
    Segwit,
    /// 2FA wallets (legacy)
    TwoFactor,
    /// 2FA wallets (segwit)
    TwoFactorSegwit,
}

impl ElectrumSeedType {
    const PREFIXES: [(&'static str, Self); 4] = [
        ("01", Self::Standard),
        ("100", Self::Segwit),
        ("101", Self::TwoFactor),
        ("102", Self::TwoFactorSegwit),
    ];

    /// Detect the type of an Electrum seed phrase from its version hash
    pub fn detect(phrase: &str) -> Option<Self> {
        let normalized = normalize_electrum_text(phrase);
        // HMAC accepts keys of any length
        let mut mac = Hmac::<Sha512>::new_from_slice(b"Seed version").ok()?;
        mac.update(normalized.as_bytes());
        let version = hex::encode(mac.finalize().into_bytes());

        Self::PREFIXES
            .into_iter()
            .find(|(prefix, _)| version.starts_with(prefix))
            .map(|(_, seed_type)| seed_type)
    }
}

/// NFKD, lower case, no accents, single spaces
fn normalize_electrum_text(text: &str) -> String {
    let stripped: String = text
        .nfkd()
        .flat_map(char::to_lowercase)
        .filter(|c| !is_combining_mark(*c))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Generate a new Electrum "standard" seed phrase
///
/// Twelve random words from the English list carry 132 bits of entropy;
/// phrases are drawn until one has the standard version prefix, about one
/// in 256.
pub fn new_electrum_mnemonic() -> Zeroizing<String> {
    let words = English::get_all();
    let mut rng = rand::rng();
    loop {
        let phrase = Zeroizing::new(
            (0..NEW_MNEMONIC_WORDS)
                .map(|_| words[rng.random_range(0..words.len())])
                .collect::<Vec<_>>()
                .join(" "),
        );
        if ElectrumSeedType::detect(&phrase) == Some(ElectrumSeedType::Standard) {
            return phrase;
        }
    }
}

/// Generate a new phrase in the given format
pub fn new_phrase(format: SeedFormat) -> Result<Zeroizing<String>, SeedError> {
    match format {
        SeedFormat::Bip39 => new_mnemonic(),
        SeedFormat::Electrum => Ok(new_electrum_mnemonic()),
    }
}

/// Generate a new English BIP39 mnemonic
pub fn new_mnemonic() -> Result<Zeroizing<String>, SeedError> {
    let mut rng = rand_v8::thread_rng();
    let mnemonic = Mnemonic::<English>::new_with_count(&mut rng, NEW_MNEMONIC_WORDS)?;
    Ok(Zeroizing::new(mnemonic.to_phrase()))
}

/// BIP39 seed of a mnemonic and optional passphrase
pub fn bip39_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<Vec<u8>>, SeedError> {
    let mnemonic = Mnemonic::<English>::new_from_phrase(phrase.trim())?;
    let seed = mnemonic.to_seed(Some(passphrase))?;
    Ok(Zeroizing::new(seed.to_vec()))
}

/// BIP32 seed of an Electrum "standard" or "segwit" phrase
pub fn electrum_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<Vec<u8>>, SeedError> {
    match ElectrumSeedType::detect(phrase) {
        Some(ElectrumSeedType::Standard | ElectrumSeedType::Segwit) => {}
        Some(ElectrumSeedType::TwoFactor | ElectrumSeedType::TwoFactorSegwit) => {
            return Err(SeedError::Unsupported("Electrum 2FA seed"));
        }
        None => return Err(SeedError::Unsupported("unrecognized or old Electrum seed")),
    }

    let password = Zeroizing::new(normalize_electrum_text(phrase));
    let salt = format!("electrum{}", normalize_electrum_text(passphrase));
    let mut seed = Zeroizing::new(vec![0u8; 64]);
    pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        salt.as_bytes(),
        ELECTRUM_PBKDF2_ROUNDS,
        &mut seed,
    );
    Ok(seed)
}

/// BIP32 seed of a phrase in the given format
pub fn derive_seed(
    phrase: &str,
    passphrase: &str,
    format: SeedFormat,
) -> Result<Zeroizing<Vec<u8>>, SeedError> {
    match format {
        SeedFormat::Bip39 => bip39_seed(phrase, passphrase),
        SeedFormat::Electrum => electrum_seed(phrase, passphrase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Electrum wallet test vectors
    const ELECTRUM_STANDARD: &str =
        "cycle rocket west magnet parrot shuffle foot correct salt library feed song";
    const ELECTRUM_SEGWIT: &str =
        "bitter grass shiver impose acquire brush forget axis eager alone wine silver";
    const ELECTRUM_2FA: &str =
        "kiss live scene rude gate step hip quarter bunker oxygen motor glove";

    const BIP39_VECTOR: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_detect_electrum_types() {
        assert_eq!(
            ElectrumSeedType::detect(ELECTRUM_STANDARD),
            Some(ElectrumSeedType::Standard)
        );
        assert_eq!(
            ElectrumSeedType::detect(ELECTRUM_SEGWIT),
            Some(ElectrumSeedType::Segwit)
        );
        assert_eq!(
            ElectrumSeedType::detect(ELECTRUM_2FA),
            Some(ElectrumSeedType::TwoFactor)
        );
    }

    #[test]
    fn test_electrum_2fa_seed_rejected() {
        assert!(matches!(
            electrum_seed(ELECTRUM_2FA, ""),
            Err(SeedError::Unsupported(_))
        ));
    }

    #[test]
    fn test_electrum_seed_normalizes_input() {
        let spaced = format!("  {}  ", ELECTRUM_STANDARD.to_uppercase().replace(' ', "   "));
        assert_eq!(
            electrum_seed(&spaced, "").unwrap(),
            electrum_seed(ELECTRUM_STANDARD, "").unwrap()
        );
        assert_ne!(
            electrum_seed(ELECTRUM_STANDARD, "").unwrap(),
            electrum_seed(ELECTRUM_STANDARD, "TREZOR").unwrap()
        );
    }

    #[test]
    fn test_bip39_vector() {
        let seed = bip39_seed(BIP39_VECTOR, "TREZOR").unwrap();
        assert_eq!(
            hex::encode(&*seed),
            "c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e53495531f09a6987599d18264c1e1c92f2cf141630c7a3c4ab7c81b2f001698e7463b04"
        );
    }

    #[test]
    fn test_invalid_bip39_rejected() {
        let bad = BIP39_VECTOR.replace("about", "abandon");
        assert!(matches!(
            bip39_seed(&bad, ""),
            Err(SeedError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_new_mnemonic_round_trips() {
        let phrase = new_mnemonic().unwrap();
        assert_eq!(phrase.split(' ').count(), NEW_MNEMONIC_WORDS);
        assert!(bip39_seed(&phrase, "").is_ok());
    }

    #[test]
    fn test_new_electrum_phrase_is_standard() {
        let phrase = new_phrase(SeedFormat::Electrum).unwrap();
        assert_eq!(phrase.split(' ').count(), NEW_MNEMONIC_WORDS);
        assert_eq!(
            ElectrumSeedType::detect(&phrase),
            Some(ElectrumSeedType::Standard)
        );
        assert!(derive_seed(&phrase, "", SeedFormat::Electrum).is_ok());
    }
}
