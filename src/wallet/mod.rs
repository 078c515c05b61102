//! Trading wallet
//!
//! Loads the signing keypair and exposes the narrow capability the order
//! manager needs: public key, message signing, balance lookup. Key custody
//! beyond the local file is out of scope.

use std::path::Path;
use std::sync::Arc;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair, Signature};
use solana_sdk::signer::Signer;
use tracing::{info, warn};

use crate::error::{Error, Result};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Wallet wrapper around the trading keypair
pub struct TradingWallet {
    keypair: Keypair,
    pubkey: Pubkey,
}

impl TradingWallet {
    /// Load the keypair from a Solana-CLI-style JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::InvalidKeypair(format!(
                "keypair file not found: {}",
                path.display()
            )));
        }

        check_permissions(path);

        let keypair = read_keypair_file(path)
            .map_err(|e| Error::InvalidKeypair(format!("{}: {e}", path.display())))?;
        let pubkey = keypair.pubkey();
        info!("trading wallet loaded: {pubkey}");

        Ok(Self { keypair, pubkey })
    }

    /// Build from an existing keypair (tests)
    pub fn from_keypair(keypair: Keypair) -> Self {
        let pubkey = keypair.pubkey();
        Self { keypair, pubkey }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    /// Sign arbitrary message bytes with the fee-payer keypair
    pub fn sign_message(&self, message: &[u8]) -> Signature {
        self.keypair.sign_message(message)
    }

    /// SOL balance of the trading wallet
    pub async fn balance_sol(&self, rpc: &Arc<RpcClient>) -> Result<f64> {
        let lamports = rpc.get_balance(&self.pubkey).await?;
        Ok(lamports as f64 / LAMPORTS_PER_SOL)
    }
}

/// Warn when the keypair file is readable by anyone but the owner
#[cfg(unix)]
fn check_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                "keypair file {} has loose permissions {:o}; expected 600",
                path.display(),
                mode
            );
        }
    }
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_message_deterministic() {
        let wallet = TradingWallet::from_keypair(Keypair::new());
        let message = b"versioned transaction message bytes";

        let a = wallet.sign_message(message);
        let b = wallet.sign_message(message);
        assert_eq!(a, b);
        assert!(a.verify(wallet.pubkey().as_ref(), message));
    }

    #[test]
    fn test_load_missing_file() {
        let err = TradingWallet::load("/nonexistent/wallet.json").unwrap_err();
        assert!(matches!(err, Error::InvalidKeypair(_)));
    }
}
