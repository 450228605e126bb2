//! Transaction helpers: signing quoted swaps, tip/fee transfers, encodings

use base64::Engine;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::{Transaction, VersionedTransaction},
};

use crate::error::{Error, Result};

/// Sign an unsigned versioned transaction returned by the quote provider
pub fn sign_versioned(
    unsigned: VersionedTransaction,
    signer: &Keypair,
) -> Result<VersionedTransaction> {
    VersionedTransaction::try_new(unsigned.message, &[signer])
        .map_err(|e| Error::TransactionBuild(format!("Signing failed: {}", e)))
}

/// Build a signed SOL transfer (Jito tip or relay fee)
pub fn build_transfer(
    payer: &Keypair,
    recipient: &Pubkey,
    lamports: u64,
    recent_blockhash: Hash,
) -> VersionedTransaction {
    let instruction = system_instruction::transfer(&payer.pubkey(), recipient, lamports);

    let transaction = Transaction::new_signed_with_payer(
        &[instruction],
        Some(&payer.pubkey()),
        &[payer],
        recent_blockhash,
    );

    VersionedTransaction::from(transaction)
}

/// First (fee payer) signature of a signed transaction
pub fn first_signature(transaction: &VersionedTransaction) -> Result<Signature> {
    transaction
        .signatures
        .first()
        .copied()
        .ok_or_else(|| Error::TransactionBuild("Transaction has no signatures".to_string()))
}

/// Wire bytes of a transaction
pub fn serialize(transaction: &VersionedTransaction) -> Result<Vec<u8>> {
    bincode::serialize(transaction).map_err(|e| Error::Serialization(e.to_string()))
}

/// Base58 wire encoding (bundle and relay payloads)
pub fn encode_base58(transaction: &VersionedTransaction) -> Result<String> {
    Ok(bs58::encode(serialize(transaction)?).into_string())
}

/// Decode a base64 wire transaction (quote provider payloads)
pub fn decode_base64(encoded: &str) -> Result<VersionedTransaction> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Deserialization(format!("Invalid base64 transaction: {}", e)))?;

    bincode::deserialize(&bytes)
        .map_err(|e| Error::Deserialization(format!("Invalid transaction bytes: {}", e)))
}

/// Derive associated token account address
pub fn derive_ata(wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
    spl_associated_token_account::get_associated_token_address(wallet, mint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::message::{Message, VersionedMessage};

    fn unsigned_transfer(payer: &Keypair) -> VersionedTransaction {
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let message = Message::new_with_blockhash(&[ix], Some(&payer.pubkey()), &Hash::new_unique());
        VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(message),
        }
    }

    #[test]
    fn test_derive_ata() {
        let wallet = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ata = derive_ata(&wallet, &mint);

        // ATA should be deterministic
        assert_eq!(ata, derive_ata(&wallet, &mint));
    }

    #[test]
    fn test_sign_versioned_produces_valid_signature() {
        let payer = Keypair::new();
        let signed = sign_versioned(unsigned_transfer(&payer), &payer).unwrap();

        let signature = first_signature(&signed).unwrap();
        assert_ne!(signature, Signature::default());
        assert!(signed.verify_with_results().iter().all(|ok| *ok));
    }

    #[test]
    fn test_transfer_is_signed_against_blockhash() {
        let payer = Keypair::new();
        let blockhash = Hash::new_unique();
        let tx = build_transfer(&payer, &Pubkey::new_unique(), 10_000, blockhash);

        assert_eq!(*tx.message.recent_blockhash(), blockhash);
        assert!(tx.verify_with_results().iter().all(|ok| *ok));
    }

    #[test]
    fn test_base64_decode_accepts_wire_bytes() {
        let payer = Keypair::new();
        let tx = unsigned_transfer(&payer);
        let encoded = base64::engine::general_purpose::STANDARD.encode(serialize(&tx).unwrap());

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded.message, tx.message);
        assert!(decode_base64("not base64!").is_err());
    }
}
