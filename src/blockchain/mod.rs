pub mod account;
pub mod account_block_pointer;
pub mod block;
pub mod builder;
pub mod consensus;
pub mod fork;
pub mod hash;
pub mod index_key_info;
pub mod state_array;
pub mod state_linker;
pub mod validation;
pub mod vote;

pub use account::Account;
pub use account_block_pointer::AccountBlockPointer;
pub use block::{Block, BlockVersion, PostStates};
pub use hash::Sha256Hash;
pub use index_key_info::IndexKeyInfo;
pub use state_array::StateArray;
pub use state_linker::StateLinker;
pub use vote::Vote;

/// Target seconds per block.
pub const DEFAULT_BLOCK_TIME: i64 = 300;
/// Intervals are clamped to this floor before adjusting difficulty.
pub const DEFAULT_MIN_BLOCK_TIME: i64 = 60;
/// ... and to this ceiling. A miner may always produce a block this late.
pub const DEFAULT_MAX_BLOCK_TIME: i64 = 540;

/// 2^64
pub const DIFF_ADJUST_NUMERATOR: u128 = 1 << 64;
/// 2^32, also the lowest base target allowed
pub const DIFF_ADJUST_NUMERATOR_HALF: u128 = 1 << 32;
/// 2^59; COE / NUMERATOR is the per-block adjustment gain (1/32)
pub const DIFF_ADJUST_NUMERATOR_COE: u128 = 1 << 59;

pub const GENESIS_BASE_TARGET: u64 = 0x21D0369D036978;

/// Window (in blocks) over which an account's mining activity counts toward
/// its effective power.
pub const EFFECTIVE_POWER_WINDOW: i64 = 288;

/// Deepest rollback a branch switch may perform.
pub const MAX_REORG_DEPTH: i64 = 288;
