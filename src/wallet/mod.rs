pub mod autosave;
pub mod extensions;
pub mod handle;
pub mod lifecycle;
pub mod store;
pub mod types;

pub use autosave::{AutoSaver, DEFAULT_AUTO_SAVE_INTERVAL};
pub use extensions::{
	ExtensionContext, ExtensionError, ExtensionFactory, WalletExtension, no_extensions,
};
pub use handle::{SharedWallet, WalletHandle};
pub use lifecycle::{StartupDecision, WalletLifecycleManager, move_wallet_out_of_the_way};
pub use store::{FileWalletStore, WalletStore, WalletStoreError};
pub use types::{DefaultWalletFactory, Wallet, WalletFactory, WalletKey, WalletSeed, unix_now};
