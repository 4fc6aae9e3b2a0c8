use bitcoin::Amount;

/// Flat fee used for the revocation transaction and for the fee-adding
/// contract-finalization variant, in satoshi. Mirrors the single fixed
/// minimum the protocol commits to instead of a dynamic fee market.
pub const DEFAULT_TX_FEE: u64 = 10_000;

/// Which network a [`Config`] addresses payments on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Process-wide knobs for the core. Constructed once by the consumer and
/// threaded by reference into the wallet core and the contract-finalization
/// path; never read from ambient global state.
#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,
    pub tx_fee: Amount,
    pub default_lookahead_index: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            tx_fee: Amount::from_sat(DEFAULT_TX_FEE),
            default_lookahead_index: 0,
        }
    }
}

impl Config {
    pub fn new(network: Network, tx_fee: Amount, default_lookahead_index: u32) -> Self {
        Self {
            network,
            tx_fee,
            default_lookahead_index,
        }
    }
}
