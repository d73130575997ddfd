pub mod hasher;
pub mod selector;

pub use hasher::KeyHasher;
pub use selector::KeySelector;
