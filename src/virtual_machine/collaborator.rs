//! External-read capabilities consumed by the interpreter.
//!
//! On chain these opcodes call other contracts. Off chain the caller supplies
//! a [`Provider`] for chain reads, a [`Signer`] for `SENDER` and the address
//! of the evaluating contract, bundled into an [`ExecContext`].

use crate::types::address::Address;
use crate::types::u256::U256;
use crate::virtual_machine::tier_report::{self, NEVER_REPORT};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Errors reported by collaborator implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("no provider configured")]
    MissingProvider,
    #[error("no signer configured")]
    MissingSigner,
    #[error("no contract address configured for THIS_ADDRESS")]
    MissingThisAddress,
    #[error("{query} failed: {reason}")]
    QueryFailed { query: &'static str, reason: String },
}

/// Read-only chain access.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn block_number(&self) -> Result<U256, CollaboratorError>;

    async fn block_timestamp(&self, block: U256) -> Result<U256, CollaboratorError>;

    async fn erc20_balance_of(&self, token: Address, account: Address) -> Result<U256, CollaboratorError>;

    async fn erc20_total_supply(&self, token: Address) -> Result<U256, CollaboratorError>;

    async fn erc20_snapshot_balance_of_at(
        &self,
        token: Address,
        account: Address,
        snapshot: U256,
    ) -> Result<U256, CollaboratorError>;

    async fn erc20_snapshot_total_supply_at(&self, token: Address, snapshot: U256) -> Result<U256, CollaboratorError>;

    async fn erc721_balance_of(&self, token: Address, account: Address) -> Result<U256, CollaboratorError>;

    async fn erc721_owner_of(&self, token: Address, id: U256) -> Result<Address, CollaboratorError>;

    async fn erc1155_balance_of(&self, token: Address, account: Address, id: U256) -> Result<U256, CollaboratorError>;

    /// Returns one balance per `(accounts[i], ids[i])` pair.
    async fn erc1155_balance_of_batch(
        &self,
        token: Address,
        accounts: &[Address],
        ids: &[U256],
    ) -> Result<Vec<U256>, CollaboratorError>;

    /// `ITierV2.report(account, context)`.
    async fn tier_report(
        &self,
        tier_contract: Address,
        account: Address,
        context: &[U256],
    ) -> Result<U256, CollaboratorError>;

    /// `ITierV2.reportTimeForTier(account, tier, context)`.
    async fn tier_report_time_for_tier(
        &self,
        tier_contract: Address,
        account: Address,
        tier: u8,
        context: &[U256],
    ) -> Result<U256, CollaboratorError>;
}

/// Identity of the account evaluating the script.
#[async_trait::async_trait]
pub trait Signer: Send + Sync {
    async fn address(&self) -> Result<Address, CollaboratorError>;
}

/// Everything a run may read from outside the program.
#[derive(Clone, Default)]
pub struct ExecContext {
    /// Caller-supplied words, read by `CONTEXT` handlers.
    pub context: Vec<U256>,
    pub provider: Option<Arc<dyn Provider>>,
    pub signer: Option<Arc<dyn Signer>>,
    pub this_address: Option<Address>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: Vec<U256>) -> Self {
        self.context = context;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_this_address(mut self, address: Address) -> Self {
        self.this_address = Some(address);
        self
    }

    pub fn provider(&self) -> Result<&dyn Provider, CollaboratorError> {
        self.provider.as_deref().ok_or(CollaboratorError::MissingProvider)
    }

    pub fn signer(&self) -> Result<&dyn Signer, CollaboratorError> {
        self.signer.as_deref().ok_or(CollaboratorError::MissingSigner)
    }

    pub fn this_address(&self) -> Result<Address, CollaboratorError> {
        self.this_address.ok_or(CollaboratorError::MissingThisAddress)
    }
}

/// Signer with a fixed address.
#[derive(Clone, Copy, Debug)]
pub struct StaticSigner(pub Address);

#[async_trait::async_trait]
impl Signer for StaticSigner {
    async fn address(&self) -> Result<Address, CollaboratorError> {
        Ok(self.0)
    }
}

/// In-memory chain view.
///
/// Unknown balances and supplies read as zero, unknown tier reports as
/// "never held". Unknown NFT owners and block timestamps fail, as the
/// corresponding on-chain calls revert.
#[derive(Clone, Debug, Default)]
pub struct MemoryProvider {
    block_number: U256,
    timestamps: HashMap<U256, U256>,
    erc20_balances: HashMap<(Address, Address), U256>,
    erc20_supplies: HashMap<Address, U256>,
    erc20_snapshot_balances: HashMap<(Address, Address, U256), U256>,
    erc20_snapshot_supplies: HashMap<(Address, U256), U256>,
    erc721_owners: HashMap<(Address, U256), Address>,
    erc1155_balances: HashMap<(Address, Address, U256), U256>,
    tier_reports: HashMap<(Address, Address), U256>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current block and its timestamp.
    pub fn at_block(mut self, number: U256, timestamp: U256) -> Self {
        self.block_number = number;
        self.timestamps.insert(number, timestamp);
        self
    }

    pub fn with_erc20_balance(mut self, token: Address, account: Address, balance: U256) -> Self {
        self.erc20_balances.insert((token, account), balance);
        self
    }

    pub fn with_erc20_supply(mut self, token: Address, supply: U256) -> Self {
        self.erc20_supplies.insert(token, supply);
        self
    }

    pub fn with_erc20_snapshot_balance(
        mut self,
        token: Address,
        account: Address,
        snapshot: U256,
        balance: U256,
    ) -> Self {
        self.erc20_snapshot_balances.insert((token, account, snapshot), balance);
        self
    }

    pub fn with_erc20_snapshot_supply(mut self, token: Address, snapshot: U256, supply: U256) -> Self {
        self.erc20_snapshot_supplies.insert((token, snapshot), supply);
        self
    }

    pub fn with_erc721_owner(mut self, token: Address, id: U256, owner: Address) -> Self {
        self.erc721_owners.insert((token, id), owner);
        self
    }

    pub fn with_erc1155_balance(mut self, token: Address, account: Address, id: U256, balance: U256) -> Self {
        self.erc1155_balances.insert((token, account, id), balance);
        self
    }

    pub fn with_tier_report(mut self, tier_contract: Address, account: Address, report: U256) -> Self {
        self.tier_reports.insert((tier_contract, account), report);
        self
    }

    fn report(&self, tier_contract: Address, account: Address) -> U256 {
        self.tier_reports
            .get(&(tier_contract, account))
            .copied()
            .unwrap_or(NEVER_REPORT)
    }
}

#[async_trait::async_trait]
impl Provider for MemoryProvider {
    async fn block_number(&self) -> Result<U256, CollaboratorError> {
        Ok(self.block_number)
    }

    async fn block_timestamp(&self, block: U256) -> Result<U256, CollaboratorError> {
        self.timestamps
            .get(&block)
            .copied()
            .ok_or_else(|| CollaboratorError::QueryFailed {
                query: "block_timestamp",
                reason: format!("no timestamp recorded for block {block}"),
            })
    }

    async fn erc20_balance_of(&self, token: Address, account: Address) -> Result<U256, CollaboratorError> {
        Ok(self.erc20_balances.get(&(token, account)).copied().unwrap_or_default())
    }

    async fn erc20_total_supply(&self, token: Address) -> Result<U256, CollaboratorError> {
        Ok(self.erc20_supplies.get(&token).copied().unwrap_or_default())
    }

    async fn erc20_snapshot_balance_of_at(
        &self,
        token: Address,
        account: Address,
        snapshot: U256,
    ) -> Result<U256, CollaboratorError> {
        Ok(self
            .erc20_snapshot_balances
            .get(&(token, account, snapshot))
            .copied()
            .unwrap_or_default())
    }

    async fn erc20_snapshot_total_supply_at(&self, token: Address, snapshot: U256) -> Result<U256, CollaboratorError> {
        Ok(self
            .erc20_snapshot_supplies
            .get(&(token, snapshot))
            .copied()
            .unwrap_or_default())
    }

    async fn erc721_balance_of(&self, token: Address, account: Address) -> Result<U256, CollaboratorError> {
        let owned = self
            .erc721_owners
            .iter()
            .filter(|((t, _), owner)| *t == token && **owner == account)
            .count();
        Ok(U256::from(owned))
    }

    async fn erc721_owner_of(&self, token: Address, id: U256) -> Result<Address, CollaboratorError> {
        self.erc721_owners
            .get(&(token, id))
            .copied()
            .ok_or_else(|| CollaboratorError::QueryFailed {
                query: "erc721_owner_of",
                reason: format!("token {id} of {token} does not exist"),
            })
    }

    async fn erc1155_balance_of(&self, token: Address, account: Address, id: U256) -> Result<U256, CollaboratorError> {
        Ok(self
            .erc1155_balances
            .get(&(token, account, id))
            .copied()
            .unwrap_or_default())
    }

    async fn erc1155_balance_of_batch(
        &self,
        token: Address,
        accounts: &[Address],
        ids: &[U256],
    ) -> Result<Vec<U256>, CollaboratorError> {
        if accounts.len() != ids.len() {
            return Err(CollaboratorError::QueryFailed {
                query: "erc1155_balance_of_batch",
                reason: format!("{} accounts but {} ids", accounts.len(), ids.len()),
            });
        }
        let mut out = Vec::with_capacity(ids.len());
        for (account, id) in accounts.iter().zip(ids) {
            out.push(self.erc1155_balance_of(token, *account, *id).await?);
        }
        Ok(out)
    }

    async fn tier_report(
        &self,
        tier_contract: Address,
        account: Address,
        _context: &[U256],
    ) -> Result<U256, CollaboratorError> {
        Ok(self.report(tier_contract, account))
    }

    async fn tier_report_time_for_tier(
        &self,
        tier_contract: Address,
        account: Address,
        tier: u8,
        _context: &[U256],
    ) -> Result<U256, CollaboratorError> {
        Ok(tier_report::time_for_tier(self.report(tier_contract, account), tier))
    }
}

/// JSON description of a chain view, loaded by the `rainvm` binary.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldSnapshot {
    pub block_number: U256,
    pub block_timestamp: U256,
    pub sender: Option<Address>,
    pub this_address: Option<Address>,
    pub context: Vec<U256>,
    pub erc20_balances: Vec<TokenBalance>,
    pub erc20_supplies: Vec<TokenSupply>,
    pub erc721_owners: Vec<NftOwner>,
    pub erc1155_balances: Vec<MultiTokenBalance>,
    pub tier_reports: Vec<TierReportEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TokenBalance {
    pub token: Address,
    pub account: Address,
    pub balance: U256,
}

#[derive(Debug, Deserialize)]
pub struct TokenSupply {
    pub token: Address,
    pub supply: U256,
}

#[derive(Debug, Deserialize)]
pub struct NftOwner {
    pub token: Address,
    pub id: U256,
    pub owner: Address,
}

#[derive(Debug, Deserialize)]
pub struct MultiTokenBalance {
    pub token: Address,
    pub account: Address,
    pub id: U256,
    pub balance: U256,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierReportEntry {
    pub tier_contract: Address,
    pub account: Address,
    pub report: U256,
}

impl WorldSnapshot {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Builds the provider and the execution context described by the snapshot.
    pub fn into_exec_context(self) -> ExecContext {
        let mut provider = MemoryProvider::new().at_block(self.block_number, self.block_timestamp);
        for b in self.erc20_balances {
            provider = provider.with_erc20_balance(b.token, b.account, b.balance);
        }
        for s in self.erc20_supplies {
            provider = provider.with_erc20_supply(s.token, s.supply);
        }
        for o in self.erc721_owners {
            provider = provider.with_erc721_owner(o.token, o.id, o.owner);
        }
        for b in self.erc1155_balances {
            provider = provider.with_erc1155_balance(b.token, b.account, b.id, b.balance);
        }
        for r in self.tier_reports {
            provider = provider.with_tier_report(r.tier_contract, r.account, r.report);
        }

        let mut ctx = ExecContext::new()
            .with_context(self.context)
            .with_provider(Arc::new(provider));
        if let Some(sender) = self.sender {
            ctx = ctx.with_signer(Arc::new(StaticSigner(sender)));
        }
        if let Some(address) = self.this_address {
            ctx = ctx.with_this_address(address);
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    #[tokio::test]
    async fn unknown_balances_read_as_zero() {
        let provider = MemoryProvider::new().with_erc20_balance(addr(1), addr(2), U256::from(5u8));
        assert_eq!(provider.erc20_balance_of(addr(1), addr(2)).await.unwrap(), U256::from(5u8));
        assert_eq!(provider.erc20_balance_of(addr(1), addr(3)).await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn unknown_owner_fails() {
        let provider = MemoryProvider::new().with_erc721_owner(addr(1), U256::ONE, addr(9));
        assert_eq!(provider.erc721_owner_of(addr(1), U256::ONE).await.unwrap(), addr(9));
        assert_eq!(provider.erc721_balance_of(addr(1), addr(9)).await.unwrap(), U256::ONE);
        assert!(matches!(
            provider.erc721_owner_of(addr(1), U256::from(2u8)).await,
            Err(CollaboratorError::QueryFailed { query: "erc721_owner_of", .. })
        ));
    }

    #[tokio::test]
    async fn batch_rejects_length_mismatch() {
        let provider = MemoryProvider::new();
        let err = provider
            .erc1155_balance_of_batch(addr(1), &[addr(2)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::QueryFailed { .. }));
    }

    #[tokio::test]
    async fn time_for_tier_reads_report_lane() {
        let report = tier_report::from_lanes([10, 20, 30, 40, 50, 60, 70, 80]);
        let provider = MemoryProvider::new().with_tier_report(addr(1), addr(2), report);
        let t = provider
            .tier_report_time_for_tier(addr(1), addr(2), 3, &[])
            .await
            .unwrap();
        assert_eq!(t, U256::from(30u8));
        assert_eq!(provider.tier_report(addr(1), addr(3), &[]).await.unwrap(), NEVER_REPORT);
    }

    #[test]
    fn missing_capabilities_are_reported() {
        let ctx = ExecContext::new();
        assert!(matches!(ctx.provider(), Err(CollaboratorError::MissingProvider)));
        assert!(matches!(ctx.signer(), Err(CollaboratorError::MissingSigner)));
        assert_eq!(ctx.this_address(), Err(CollaboratorError::MissingThisAddress));
    }

    #[tokio::test]
    async fn snapshot_builds_context() {
        let snapshot = WorldSnapshot::from_json(
            r#"{
                "blockNumber": 12,
                "blockTimestamp": "1700000000",
                "sender": "0x0101010101010101010101010101010101010101",
                "context": [1, "0x02"],
                "erc20Balances": [{
                    "token": "0x0202020202020202020202020202020202020202",
                    "account": "0x0101010101010101010101010101010101010101",
                    "balance": "1000"
                }]
            }"#,
        )
        .unwrap();
        let ctx = snapshot.into_exec_context();
        assert_eq!(ctx.context, vec![U256::ONE, U256::from(2u8)]);
        let provider = ctx.provider().unwrap();
        let block = provider.block_number().await.unwrap();
        assert_eq!(block, U256::from(12u8));
        assert_eq!(provider.block_timestamp(block).await.unwrap(), U256::from(1_700_000_000u64));
        assert_eq!(
            provider.erc20_balance_of(addr(2), addr(1)).await.unwrap(),
            U256::from(1000u16)
        );
        assert_eq!(ctx.signer().unwrap().address().await.unwrap(), addr(1));
    }
}
