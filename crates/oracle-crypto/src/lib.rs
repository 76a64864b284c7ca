pub mod hash;
pub mod keypair;
pub mod pack;

pub use hash::{canonical_hash, keccak256, text_hash};
pub use keypair::{public_key_to_address, recover_address, KeyPair};
pub use pack::{build_message_data, pack_all, pack_address, pack_uint256, pack_value, PackedValue};
