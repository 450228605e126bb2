//! Account feed over the ledger's websocket pubsub API

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::RpcAccountInfoConfig;
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::accounts::token_amount;
use crate::error::{Error, Result};
use crate::stream::DiscoveryEvent;
use crate::subscription::{AccountFeed, SubscriptionId};

/// One task per subscription; dropping or firing its sender stops it
pub struct PubsubAccountFeed {
    client: Arc<PubsubClient>,
    events: mpsc::Sender<DiscoveryEvent>,
    tasks: DashMap<SubscriptionId, oneshot::Sender<()>>,
    next_id: AtomicU64,
}

impl PubsubAccountFeed {
    pub async fn connect(ws_url: &str, events: mpsc::Sender<DiscoveryEvent>) -> Result<Self> {
        let client = PubsubClient::new(ws_url)
            .await
            .map_err(|e| Error::FeedConnection(format!("pubsub connect to {}: {}", ws_url, e)))?;

        info!("Account feed connected to {}", ws_url);

        Ok(Self {
            client: Arc::new(client),
            events,
            tasks: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl AccountFeed for PubsubAccountFeed {
    async fn subscribe(&self, mint: Pubkey, account: Pubkey) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let client = self.client.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let config = RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(CommitmentConfig::confirmed()),
                ..Default::default()
            };

            let (mut updates, unsubscribe) = match client.account_subscribe(&account, Some(config)).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::FeedConnection(format!(
                        "account_subscribe {}: {}",
                        account, e
                    ))));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    update = updates.next() => {
                        let Some(response) = update else {
                            warn!("Account stream for {} ended", account);
                            break;
                        };

                        let Some(decoded) = response.value.decode::<Account>() else {
                            warn!("Undecodable account update for {}", account);
                            continue;
                        };

                        match token_amount(&decoded) {
                            Ok(amount) => {
                                debug!("{} balance now {}", mint, amount);
                                let event = DiscoveryEvent::WalletBalanceChanged {
                                    account_id: account,
                                    mint,
                                    amount,
                                };
                                if events.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Account update for {}: {}", account, e),
                        }
                    }
                }
            }

            drop(updates);
            unsubscribe().await;
            debug!("Subscription {} for {} stopped", id, mint);
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.tasks.insert(id, stop_tx);
                Ok(id)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::FeedConnection(format!(
                "subscription task for {} exited early",
                account
            ))),
        }
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let (_, stop) = self
            .tasks
            .remove(&id)
            .ok_or(Error::SubscriptionNotFound(id.0))?;

        // The task may already be gone if its stream ended
        let _ = stop.send(());
        Ok(())
    }
}
