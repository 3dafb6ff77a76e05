//! Shared test helpers for `nodewatch-core` unit tests.
//!
//! Builds deterministic txids, addresses, and consensus-encoded fixtures
//! (the regtest genesis header and coinbase) so parsing and dispatch tests
//! share one source of dummy data.

use bitcoin::address::NetworkUnchecked;
use bitcoin::blockdata::constants::genesis_block;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::{Address, Block, Network, Txid};

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

pub fn testnet_address(s: &str) -> Address {
    s.parse::<Address<NetworkUnchecked>>()
        .expect("static address must parse")
        .require_network(Network::Testnet)
        .expect("static address must be a testnet address")
}

pub fn regtest_genesis() -> Block {
    genesis_block(Network::Regtest)
}

pub fn genesis_header_hex() -> String {
    serialize_hex(&regtest_genesis().header)
}

pub fn genesis_coinbase_hex() -> String {
    serialize_hex(&regtest_genesis().txdata[0])
}
