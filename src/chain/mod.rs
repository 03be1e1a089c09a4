pub mod bootstrap;
pub mod checkpoints;
pub mod store;
pub mod validator;

pub use bootstrap::{BootstrapPlan, ChainBootstrapper};
pub use checkpoints::{
	CHECKPOINT_LOOKBACK_SECS, Checkpoint, CheckpointError, CheckpointSeeder, CheckpointSource,
};
pub use store::{
	BlockStore, BlockStoreProvider, DEFAULT_STORE_CAPACITY, FileBlockStore, FileBlockStoreProvider,
	StoreError, StoredHeader,
};
pub use validator::{ChainError, ChainHandle, HeaderChain};
