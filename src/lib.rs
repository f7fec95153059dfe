pub mod decrypter;
pub mod error;
pub mod format;
pub mod kgdb;
pub mod qmc2;
mod stream;

pub use decrypter::{CancelFlag, DecryptOptions, Decrypter, DecrypterRegistry};
pub use error::{DecryptError, Result};
pub use format::AudioFormat;
pub use kgdb::{load_key_table, KeyTable};
