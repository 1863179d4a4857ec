//! Hot wallet used to pay the delivery platform.
//!
//! Key derivation, cell serialisation and the v4r2 message layout come from
//! `tonlib-core`; this module only wires them to the HTTP client.

use crate::chains::ton::client::TonClient;
use crate::chains::ton::config::TonConfig;
use crate::chains::ton::errors::{TonError, TonResult};
use crate::chains::traits::{OnChainWallet, TransferReceipt, TransferRequest, WalletResult};
use crate::logging::mask_wallet_address;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use num_bigint::BigUint;
use std::fmt;
use std::sync::Arc;
use tonlib_core::cell::{BagOfCells, Cell, CellBuilder};
use tonlib_core::message::TransferMessage;
use tonlib_core::mnemonic::{KeyPair, Mnemonic};
use tonlib_core::wallet::{TonWallet as WalletContract, WalletVersion};
use tonlib_core::TonAddress;
use tracing::info;

pub const MESSAGE_TTL_SECS: u32 = 60;

/// Bytes left in the root comment cell after the 32-bit opcode.
const FIRST_COMMENT_CHUNK: usize = 123;
const COMMENT_CHUNK: usize = 127;

fn cell_error(e: impl fmt::Display) -> TonError {
    TonError::serialization_error(e.to_string())
}

pub fn parse_address(raw: &str) -> TonResult<TonAddress> {
    raw.trim()
        .parse::<TonAddress>()
        .map_err(|_| TonError::invalid_address(raw))
}

/// Key pair for a TON mnemonic without a password.
pub fn key_pair_from_mnemonic(words: &[String]) -> TonResult<KeyPair> {
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    let mnemonic =
        Mnemonic::new(words, &None).map_err(|e| TonError::invalid_mnemonic(e.to_string()))?;
    mnemonic
        .to_key_pair()
        .map_err(|e| TonError::invalid_mnemonic(e.to_string()))
}

/// Text comment body (op 0), snaked across child cells when it overflows.
pub fn comment_body(text: &str) -> TonResult<Cell> {
    let bytes = text.as_bytes();
    let (head, mut rest) = bytes.split_at(bytes.len().min(FIRST_COMMENT_CHUNK));

    let mut chunks = Vec::new();
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(COMMENT_CHUNK));
        chunks.push(chunk);
        rest = tail;
    }

    let mut next: Option<Cell> = None;
    for chunk in chunks.iter().rev() {
        let mut builder = CellBuilder::new();
        builder.store_slice(chunk).map_err(cell_error)?;
        if let Some(child) = next.take() {
            builder.store_reference(&Arc::new(child)).map_err(cell_error)?;
        }
        next = Some(builder.build().map_err(cell_error)?);
    }

    let mut builder = CellBuilder::new();
    builder
        .store_u32(32, 0)
        .map_err(cell_error)?
        .store_slice(head)
        .map_err(cell_error)?;
    if let Some(child) = next {
        builder.store_reference(&Arc::new(child)).map_err(cell_error)?;
    }
    builder.build().map_err(cell_error)
}

/// Signed external message carrying one commented transfer.
pub fn build_transfer(
    contract: &WalletContract,
    seqno: u32,
    valid_until: u32,
    destination: &TonAddress,
    amount_nano: u64,
    memo: &str,
) -> TonResult<Cell> {
    let body = comment_body(memo)?;
    let internal = TransferMessage::new(destination, &BigUint::from(amount_nano))
        .with_data(Arc::new(body))
        .build()
        .map_err(cell_error)?;
    contract
        .create_external_message(valid_until, seqno, vec![Arc::new(internal)], false)
        .map_err(cell_error)
}

pub fn serialize_boc(message: Cell) -> TonResult<Vec<u8>> {
    BagOfCells::from_root(message)
        .serialize(true)
        .map_err(cell_error)
}

pub struct TonWallet {
    client: TonClient,
    contract: WalletContract,
}

impl fmt::Debug for TonWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TonWallet")
            .field("address", &self.contract.address.to_base64_url())
            .finish_non_exhaustive()
    }
}

impl TonWallet {
    /// Derives the key from the mnemonic on the blocking pool and checks it
    /// controls the configured v4r2 address.
    pub async fn new(config: TonConfig) -> TonResult<Self> {
        config.validate()?;
        let configured = parse_address(&config.wallet_address)?;
        let words = config.mnemonic.clone();
        let key_pair = tokio::task::spawn_blocking(move || key_pair_from_mnemonic(&words))
            .await
            .map_err(|e| TonError::invalid_mnemonic(format!("key derivation aborted: {}", e)))??;
        let contract = WalletContract::derive_default(WalletVersion::V4R2, &key_pair)
            .map_err(|e| TonError::config_error(e.to_string()))?;
        if contract.address != configured {
            return Err(TonError::config_error(format!(
                "mnemonic controls {}, not the configured wallet",
                mask_wallet_address(&contract.address.to_base64_url())
            )));
        }
        let client = TonClient::new(config)?;

        info!(
            address = %mask_wallet_address(&contract.address.to_base64_url()),
            "TON wallet loaded"
        );
        Ok(Self { client, contract })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.contract.key_pair.public_key)
    }
}

#[async_trait]
impl OnChainWallet for TonWallet {
    fn chain_id(&self) -> &str {
        "ton"
    }

    fn address(&self) -> String {
        self.contract.address.to_base64_url()
    }

    async fn balance_nano(&self) -> WalletResult<u64> {
        Ok(self.client.get_balance(&self.address()).await?)
    }

    async fn transfer(&self, request: TransferRequest) -> WalletResult<TransferReceipt> {
        let destination = parse_address(&request.destination)?;
        let wallet_address = self.address();

        let seqno = self.client.get_seqno(&wallet_address).await?;
        if seqno == 0 {
            return Err(TonError::WalletNotDeployed {
                address: wallet_address,
            }
            .into());
        }

        let now = chrono::Utc::now().timestamp().max(0) as u32;
        let message = build_transfer(
            &self.contract,
            seqno,
            now + MESSAGE_TTL_SECS,
            &destination,
            request.amount_nano,
            &request.memo,
        )?;
        let tx_ref = hex::encode(message.cell_hash());
        let boc = serialize_boc(message)?;

        self.client.send_boc(&STANDARD.encode(boc)).await?;
        info!(
            tx_ref = %tx_ref,
            seqno,
            amount_nano = request.amount_nano,
            destination = %mask_wallet_address(&request.destination),
            "TON transfer submitted"
        );
        Ok(TransferReceipt { tx_ref, seqno })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn contract() -> WalletContract {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let key_pair = KeyPair {
            public_key: signing.verifying_key().to_bytes().to_vec(),
            secret_key: signing.to_keypair_bytes().to_vec(),
        };
        WalletContract::derive_default(WalletVersion::V4R2, &key_pair).unwrap()
    }

    fn destination() -> TonAddress {
        parse_address("EQBAjaOyi2wGWlk-EDkSabqqnF-MrrwMadnwqrurKpkla9nE").unwrap()
    }

    #[test]
    fn rejects_words_outside_the_wordlist() {
        let words = vec!["notaword".to_string(); 24];
        assert!(matches!(
            key_pair_from_mnemonic(&words),
            Err(TonError::InvalidMnemonic { .. })
        ));
    }

    #[test]
    fn garbage_address_is_rejected() {
        assert!(matches!(
            parse_address("not-an-address"),
            Err(TonError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn wallet_lives_in_basechain() {
        assert_eq!(contract().address.workchain, 0);
    }

    #[test]
    fn transfer_serialises_as_boc() {
        let message = build_transfer(
            &contract(),
            9,
            1_700_000_060,
            &destination(),
            2_000_000_000,
            "100 Telegram Stars Ref#abc",
        )
        .unwrap();
        let encoded = STANDARD.encode(serialize_boc(message).unwrap());
        assert!(encoded.starts_with("te6cc"));
    }

    #[test]
    fn transfer_hash_changes_with_seqno() {
        let c = contract();
        let a = build_transfer(&c, 1, 100, &destination(), 5, "m").unwrap();
        let b = build_transfer(&c, 2, 100, &destination(), 5, "m").unwrap();
        let (a, b) = (hex::encode(a.cell_hash()), hex::encode(b.cell_hash()));
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn long_comments_are_snaked() {
        let text = "x".repeat(400);
        assert!(comment_body(&text).is_ok());
        assert!(comment_body("").is_ok());
    }
}
