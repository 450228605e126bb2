//! SPL token account decoding
//!
//! Vaults and wallet balances are token accounts, LP and token mints are
//! mint accounts. Only the fixed base layout is read, so accounts with
//! trailing extension data decode as well.

use solana_sdk::account::Account;
use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::{Account as TokenAccount, Mint};

use crate::error::{Error, Result};

/// Decode a token account
pub fn decode_token_account(data: &[u8]) -> Result<TokenAccount> {
    if data.len() < TokenAccount::LEN {
        return Err(Error::AccountDecode(format!(
            "token account data too short: {} bytes",
            data.len()
        )));
    }
    TokenAccount::unpack_from_slice(&data[..TokenAccount::LEN])
        .map_err(|e| Error::AccountDecode(format!("token account: {}", e)))
}

/// Raw token balance held by a token account
pub fn token_amount(account: &Account) -> Result<u64> {
    Ok(decode_token_account(&account.data)?.amount)
}

/// Decode a mint account
pub fn decode_mint(account: &Account) -> Result<Mint> {
    if account.data.len() < Mint::LEN {
        return Err(Error::AccountDecode(format!(
            "mint data too short: {} bytes",
            account.data.len()
        )));
    }
    Mint::unpack_from_slice(&account.data[..Mint::LEN])
        .map_err(|e| Error::AccountDecode(format!("mint: {}", e)))
}

/// Unwrap an optional account fetched for `key`
pub fn require(account: Option<Account>, key: &Pubkey) -> Result<Account> {
    account.ok_or_else(|| Error::AccountNotFound(key.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use spl_token::solana_program::program_option::COption;
    use spl_token::state::AccountState;

    /// Packed token account holding `amount` of `mint`
    pub(crate) fn token_account(mint: Pubkey, amount: u64) -> Account {
        let mut data = vec![0u8; TokenAccount::LEN];
        TokenAccount {
            mint,
            owner: Pubkey::new_unique(),
            amount,
            state: AccountState::Initialized,
            ..Default::default()
        }
        .pack_into_slice(&mut data);

        Account {
            lamports: 2_039_280,
            data,
            owner: spl_token::id(),
            executable: false,
            rent_epoch: 0,
        }
    }

    /// Packed mint account
    pub(crate) fn mint_account(
        supply: u64,
        mint_authority: Option<Pubkey>,
        freeze_authority: Option<Pubkey>,
    ) -> Account {
        let mut data = vec![0u8; Mint::LEN];
        Mint {
            mint_authority: mint_authority.map(COption::Some).unwrap_or(COption::None),
            supply,
            decimals: 6,
            is_initialized: true,
            freeze_authority: freeze_authority.map(COption::Some).unwrap_or(COption::None),
        }
        .pack_into_slice(&mut data);

        Account {
            lamports: 1_461_600,
            data,
            owner: spl_token::id(),
            executable: false,
            rent_epoch: 0,
        }
    }

    #[test]
    fn test_token_amount() {
        let account = token_account(Pubkey::new_unique(), 123_456);
        assert_eq!(token_amount(&account).unwrap(), 123_456);
    }

    #[test]
    fn test_token_account_with_trailing_data() {
        let mut account = token_account(Pubkey::new_unique(), 9);
        account.data.extend_from_slice(&[0u8; 32]);
        assert_eq!(token_amount(&account).unwrap(), 9);
    }

    #[test]
    fn test_short_data_rejected() {
        let mut account = token_account(Pubkey::new_unique(), 1);
        account.data.truncate(10);
        assert!(matches!(token_amount(&account), Err(Error::AccountDecode(_))));
    }

    #[test]
    fn test_decode_mint_authorities() {
        let authority = Pubkey::new_unique();
        let mint = decode_mint(&mint_account(0, None, Some(authority))).unwrap();
        assert_eq!(mint.supply, 0);
        assert!(mint.mint_authority.is_none());
        assert_eq!(mint.freeze_authority, COption::Some(authority));
    }
}
