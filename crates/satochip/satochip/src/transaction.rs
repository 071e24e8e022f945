//! Minimal transaction model handed over by the wallet
//!
//! Only what signing needs: prevouts, script codes, values for BIP143,
//! candidate keys with their derivations and the signatures applied so far.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::crypto::{hash160, sha256d};

/// SIGHASH_ALL, the only hash type the card signs
pub const SIGHASH_ALL: u32 = 0x01;

/// Script type of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    /// Pay to public key hash
    P2pkh,
    /// Pay to script hash (multisig)
    P2sh,
    /// P2WPKH nested in P2SH
    P2wpkhP2sh,
    /// P2WSH nested in P2SH
    P2wshP2sh,
    /// Native P2WPKH
    P2wpkh,
    /// Native P2WSH
    P2wsh,
    /// Coinbase input; never signed
    Coinbase,
}

impl InputType {
    /// Wallet name of the script type
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P2pkh => "p2pkh",
            Self::P2sh => "p2sh",
            Self::P2wpkhP2sh => "p2wpkh-p2sh",
            Self::P2wshP2sh => "p2wsh-p2sh",
            Self::P2wpkh => "p2wpkh",
            Self::P2wsh => "p2wsh",
            Self::Coinbase => "coinbase",
        }
    }

    /// Whether the input is signed with the BIP143 digest
    pub const fn is_segwit(self) -> bool {
        matches!(
            self,
            Self::P2wpkhP2sh | Self::P2wshP2sh | Self::P2wpkh | Self::P2wsh
        )
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a previous output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutPoint {
    /// Transaction id in internal byte order
    pub txid: [u8; 32],
    /// Output index
    pub vout: u32,
}

/// A key that may sign an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateKey {
    /// Compressed public key
    pub public_key: [u8; 33],
    /// `(change, index)` below the account path, if this wallet owns the key
    pub derivation: Option<(u32, u32)>,
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Spent output
    pub prevout: OutPoint,
    /// Script type
    pub input_type: InputType,
    /// Script code placed in the signature digest
    pub script_code: Vec<u8>,
    /// Value of the spent output, needed by BIP143
    pub value: u64,
    /// nSequence
    pub sequence: u32,
    /// Keys in script order
    pub keys: Vec<CandidateKey>,
    /// Signatures by key position, DER with the hash type appended
    pub signatures: Vec<Option<Vec<u8>>>,
    /// Number of signatures the script needs
    pub threshold: usize,
}

impl TxInput {
    /// Single-key input whose script code is the P2PKH script of `key`
    pub fn single_key(
        prevout: OutPoint,
        input_type: InputType,
        value: u64,
        key: CandidateKey,
    ) -> Self {
        Self {
            prevout,
            input_type,
            script_code: p2pkh_script(&key.public_key),
            value,
            sequence: 0xFFFF_FFFD,
            keys: vec![key],
            signatures: vec![None],
            threshold: 1,
        }
    }

    /// Whether enough signatures are present
    pub fn is_complete(&self) -> bool {
        self.signatures.iter().flatten().count() >= self.threshold
    }

    /// First unsigned key the wallet can derive, with its position
    pub fn signing_key(&self) -> Option<(usize, &CandidateKey, (u32, u32))> {
        self.keys.iter().enumerate().find_map(|(position, key)| {
            let unsigned = self.signatures.get(position).is_none_or(Option::is_none);
            match key.derivation {
                Some(derivation) if unsigned => Some((position, key, derivation)),
                _ => None,
            }
        })
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount
    pub value: u64,
    /// Locking script
    pub script_pubkey: Vec<u8>,
}

/// Unsigned or partially signed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// nVersion
    pub version: u32,
    /// Inputs
    pub inputs: Vec<TxInput>,
    /// Outputs
    pub outputs: Vec<TxOutput>,
    /// nLockTime
    pub lock_time: u32,
}

impl Transaction {
    /// Whether every input is fully signed
    pub fn is_complete(&self) -> bool {
        self.inputs.iter().all(TxInput::is_complete)
    }

    /// Record a signature at `(input, key position)`
    pub fn add_signature(&mut self, input: usize, position: usize, signature: Vec<u8>) {
        if let Some(input) = self.inputs.get_mut(input) {
            if input.signatures.len() <= position {
                input.signatures.resize(position + 1, None);
            }
            input.signatures[position] = Some(signature);
        }
    }
}

/// Digest parts shared by every input of one transaction
///
/// Outputs are serialized once; BIP143 `hashOutputs` and the 2FA request reuse
/// the result.
#[derive(Debug, Clone)]
pub struct SighashCache {
    outputs: Vec<u8>,
    hash_prevouts: [u8; 32],
    hash_sequence: [u8; 32],
    hash_outputs: [u8; 32],
}

impl SighashCache {
    /// Precompute the digests of `tx`
    pub fn new(tx: &Transaction) -> Self {
        let mut prevouts = BytesMut::new();
        let mut sequences = BytesMut::new();
        for input in &tx.inputs {
            put_outpoint(&mut prevouts, &input.prevout);
            sequences.put_u32_le(input.sequence);
        }

        let mut outputs = BytesMut::new();
        for output in &tx.outputs {
            outputs.put_u64_le(output.value);
            put_var_bytes(&mut outputs, &output.script_pubkey);
        }

        Self {
            hash_prevouts: sha256d(&prevouts),
            hash_sequence: sha256d(&sequences),
            hash_outputs: sha256d(&outputs),
            outputs: outputs.to_vec(),
        }
    }

    /// Serialized outputs without their count
    pub fn outputs(&self) -> &[u8] {
        &self.outputs
    }

    /// Serialized outputs prefixed with their count
    pub fn outputs_with_count(&self, count: usize) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(9 + self.outputs.len());
        put_var_int(&mut out, count as u64);
        out.put_slice(&self.outputs);
        out.to_vec()
    }

    /// BIP143 `hashOutputs`
    pub const fn hash_outputs(&self) -> &[u8; 32] {
        &self.hash_outputs
    }

    /// SIGHASH_ALL preimage of input `index`
    ///
    /// Segwit inputs use the BIP143 layout, the others the legacy one.
    pub fn preimage(&self, tx: &Transaction, index: usize) -> Vec<u8> {
        let input = &tx.inputs[index];
        let mut out = BytesMut::new();
        out.put_u32_le(tx.version);

        if input.input_type.is_segwit() {
            out.put_slice(&self.hash_prevouts);
            out.put_slice(&self.hash_sequence);
            put_outpoint(&mut out, &input.prevout);
            put_var_bytes(&mut out, &input.script_code);
            out.put_u64_le(input.value);
            out.put_u32_le(input.sequence);
            out.put_slice(&self.hash_outputs);
        } else {
            put_var_int(&mut out, tx.inputs.len() as u64);
            for (i, other) in tx.inputs.iter().enumerate() {
                put_outpoint(&mut out, &other.prevout);
                if i == index {
                    put_var_bytes(&mut out, &input.script_code);
                } else {
                    put_var_int(&mut out, 0);
                }
                out.put_u32_le(other.sequence);
            }
            put_var_int(&mut out, tx.outputs.len() as u64);
            out.put_slice(&self.outputs);
        }

        out.put_u32_le(tx.lock_time);
        out.put_u32_le(SIGHASH_ALL);
        out.to_vec()
    }
}

/// `OP_DUP OP_HASH160 <hash160(key)> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script(public_key: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xA9, 0x14]);
    script.extend_from_slice(&hash160(public_key));
    script.extend_from_slice(&[0x88, 0xAC]);
    script
}

fn put_outpoint(out: &mut BytesMut, outpoint: &OutPoint) {
    out.put_slice(&outpoint.txid);
    out.put_u32_le(outpoint.vout);
}

fn put_var_bytes(out: &mut BytesMut, data: &[u8]) {
    put_var_int(out, data.len() as u64);
    out.put_slice(data);
}

/// Bitcoin CompactSize
fn put_var_int(out: &mut BytesMut, value: u64) {
    match value {
        0..=0xFC => out.put_u8(value as u8),
        0xFD..=0xFFFF => {
            out.put_u8(0xFD);
            out.put_u16_le(value as u16);
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.put_u8(0xFE);
            out.put_u32_le(value as u32);
        }
        _ => {
            out.put_u8(0xFF);
            out.put_u64_le(value);
        }
    }
}
