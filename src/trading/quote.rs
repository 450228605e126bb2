//! Swap-quote provider client
//!
//! The provider does the routing math and hands back an unsigned versioned
//! transaction plus the block height it stays valid until. We only sign and
//! submit it.
//!
//! API Documentation: https://station.jup.ag/docs/apis/swap-api

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::QuoteConfig;
use crate::error::{Error, Result};
use crate::trading::http::JsonTransport;
use crate::trading::ledger::BlockhashWindow;
use crate::trading::transaction::decode_base64;

/// What to swap
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub mint_in: Pubkey,
    pub mint_out: Pubkey,
    /// Raw amount of `mint_in`
    pub amount: u64,
    pub slippage_bps: u16,
    /// Wallet that signs and pays
    pub sender: Pubkey,
}

/// An unsigned swap ready to sign
#[derive(Debug, Clone)]
pub struct QuotedSwap {
    pub transaction: VersionedTransaction,
    pub window: BlockhashWindow,
    /// Raw amount of `mint_in` spent
    pub in_amount: u64,
    /// Raw amount of `mint_out` expected
    pub out_amount: u64,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn swap_transaction(&self, request: &QuoteRequest) -> Result<QuotedSwap>;
}

/// Swap request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    quote_response: &'a Value,
    user_public_key: String,
    wrap_and_unwrap_sol: bool,
    prioritization_fee_lamports: u64,
}

/// Swap response (unsigned transaction)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    /// Base64 encoded unsigned transaction
    swap_transaction: Option<String>,
    last_valid_block_height: Option<u64>,
    error: Option<String>,
}

/// Jupiter v6 quote + swap client
pub struct JupiterQuoteProvider {
    api_url: String,
    priority_fee_lamports: u64,
    transport: Arc<dyn JsonTransport>,
}

impl JupiterQuoteProvider {
    pub fn new(config: &QuoteConfig, transport: Arc<dyn JsonTransport>) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            priority_fee_lamports: config.priority_fee_lamports,
            transport,
        }
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Value> {
        let query = [
            ("inputMint", request.mint_in.to_string()),
            ("outputMint", request.mint_out.to_string()),
            ("amount", request.amount.to_string()),
            ("slippageBps", request.slippage_bps.to_string()),
        ];

        let quote = self
            .transport
            .get_json(&format!("{}/quote", self.api_url), &query)
            .await?;

        if let Some(error) = quote.get("error").and_then(Value::as_str) {
            return Err(Error::Quote(error.to_string()));
        }

        Ok(quote)
    }
}

/// Amounts are decimal strings in the quote response
fn read_amount(quote: &Value, field: &str) -> Result<u64> {
    quote
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Quote(format!("Quote is missing {}", field)))?
        .parse::<u64>()
        .map_err(|e| Error::Quote(format!("Invalid {}: {}", field, e)))
}

#[async_trait]
impl QuoteProvider for JupiterQuoteProvider {
    async fn swap_transaction(&self, request: &QuoteRequest) -> Result<QuotedSwap> {
        let quote = self.quote(request).await?;
        let in_amount = read_amount(&quote, "inAmount")?;
        let out_amount = read_amount(&quote, "outAmount")?;

        debug!(
            "Quote {} -> {}: {} in, {} out",
            request.mint_in, request.mint_out, in_amount, out_amount
        );

        let body = serde_json::to_value(SwapRequest {
            quote_response: &quote,
            user_public_key: request.sender.to_string(),
            wrap_and_unwrap_sol: true,
            prioritization_fee_lamports: self.priority_fee_lamports,
        })?;

        let response: SwapResponse = serde_json::from_value(
            self.transport
                .post_json(&format!("{}/swap", self.api_url), &body)
                .await?,
        )
        .map_err(|e| Error::Deserialization(format!("Failed to parse swap response: {}", e)))?;

        if let Some(error) = response.error {
            return Err(Error::Quote(error));
        }

        let encoded = response
            .swap_transaction
            .ok_or_else(|| Error::Quote("No transaction in response".to_string()))?;
        let last_valid_block_height = response
            .last_valid_block_height
            .ok_or_else(|| Error::Quote("No lastValidBlockHeight in response".to_string()))?;

        let transaction = decode_base64(&encoded)?;
        let window = BlockhashWindow {
            blockhash: *transaction.message.recent_blockhash(),
            last_valid_block_height,
        };

        info!(
            "Received swap transaction for {} (valid until block {})",
            request.mint_out, last_valid_block_height
        );

        Ok(QuotedSwap {
            transaction,
            window,
            in_amount,
            out_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::jito::tests::ScriptedTransport;
    use crate::trading::transaction::serialize;
    use base64::Engine;
    use serde_json::json;
    use solana_sdk::hash::Hash;
    use solana_sdk::message::{Message, VersionedMessage};
    use solana_sdk::signature::Signature;
    use solana_sdk::system_instruction;

    fn provider(transport: Arc<ScriptedTransport>) -> JupiterQuoteProvider {
        JupiterQuoteProvider::new(
            &QuoteConfig {
                api_url: "https://quote.test/v6/".to_string(),
                ..Default::default()
            },
            transport,
        )
    }

    fn request() -> QuoteRequest {
        QuoteRequest {
            mint_in: spl_token::native_mint::id(),
            mint_out: Pubkey::new_unique(),
            amount: 10_000_000,
            slippage_bps: 2000,
            sender: Pubkey::new_unique(),
        }
    }

    fn unsigned_swap(blockhash: Hash) -> String {
        let payer = Pubkey::new_unique();
        let ix = system_instruction::transfer(&payer, &Pubkey::new_unique(), 1);
        let tx = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(Message::new_with_blockhash(
                &[ix],
                Some(&payer),
                &blockhash,
            )),
        };
        base64::engine::general_purpose::STANDARD.encode(serialize(&tx).unwrap())
    }

    #[tokio::test]
    async fn test_swap_transaction_carries_window_and_amounts() {
        let transport = Arc::new(ScriptedTransport::default());
        let blockhash = Hash::new_unique();
        transport.respond(
            "https://quote.test/v6/quote",
            Ok(json!({"inAmount": "10000000", "outAmount": "3500000000"})),
        );
        transport.respond(
            "https://quote.test/v6/swap",
            Ok(json!({
                "swapTransaction": unsigned_swap(blockhash),
                "lastValidBlockHeight": 250_000_150u64,
            })),
        );

        let swap = provider(transport.clone())
            .swap_transaction(&request())
            .await
            .unwrap();

        assert_eq!(swap.in_amount, 10_000_000);
        assert_eq!(swap.out_amount, 3_500_000_000);
        assert_eq!(swap.window.blockhash, blockhash);
        assert_eq!(swap.window.last_valid_block_height, 250_000_150);

        // The quote is passed back verbatim to the swap endpoint
        let calls = transport.calls.lock().unwrap();
        let swap_body = &calls[1].1;
        assert_eq!(swap_body["quoteResponse"]["outAmount"], "3500000000");
        assert_eq!(swap_body["wrapAndUnwrapSol"], true);
    }

    #[tokio::test]
    async fn test_provider_error_is_quote_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            "https://quote.test/v6/quote",
            Ok(json!({"error": "Could not find any route"})),
        );

        let result = provider(transport).swap_transaction(&request()).await;
        assert!(matches!(result, Err(Error::Quote(_))));
    }

    #[tokio::test]
    async fn test_missing_block_height_rejected() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            "https://quote.test/v6/quote",
            Ok(json!({"inAmount": "1", "outAmount": "2"})),
        );
        transport.respond(
            "https://quote.test/v6/swap",
            Ok(json!({"swapTransaction": unsigned_swap(Hash::new_unique())})),
        );

        let result = provider(transport).swap_transaction(&request()).await;
        assert!(matches!(result, Err(Error::Quote(_))));
    }
}
