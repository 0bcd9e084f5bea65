mod hash_ring;


pub use hash_ring::*;
