pub mod types;
pub mod import;
pub mod container; // Mail-message unpacking (.msg)
pub mod extraction;
pub mod normalize; // Recursive normalizer: files → model parts + manifest
pub mod structuring;
pub mod processor;
pub mod diagnostic; // Pipeline diagnostic dump (TAXDOC_DUMP_DIR)
