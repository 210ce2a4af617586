#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

pub mod cluster;
pub mod error;
pub mod features;
pub mod grid;
pub mod osm_tags;
pub mod parse;
pub mod split;
pub mod units;

pub use cluster::{DbHandle, SplitParams, SplittingAlgorithm};
pub use error::SplitterError;
pub use split::{split_by_features, split_by_sql, split_by_square};

pub const WGS_84_SRID: u32 = 4326;
