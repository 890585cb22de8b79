pub mod ping;
pub mod infos;
pub mod algorithm;
pub mod apply;
