pub mod cipher;
pub mod hashed_block_stream;
pub mod modes;
pub mod random_stream;
