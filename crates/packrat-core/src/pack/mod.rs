//! Archive container writing (tar.gz) with single-pass hashing.

mod hashing;
mod packer;

pub use hashing::HashingReader;
pub use packer::{append_descriptor, append_file, pack_folder, PackSpec};
