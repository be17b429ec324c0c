//! Built-in blocks
//!
//! | Block | Type | Output |
//! |-------|------|--------|
//! | [`DeleteBlock`] | `docdb-delete` | one enriched signal per input, as one batch |
//! | [`UpdateBlock`] | `docdb-update` | one result signal per update, then the input batch |

pub mod delete;
pub mod update;

pub use delete::{DeleteBlock, DeleteBlockConfig, DeleteBlockFactory};
pub use update::{MatchKey, UpdateBlock, UpdateBlockConfig, UpdateBlockFactory};
