pub mod interface;
pub mod netfilter;
pub mod pf_anchor;
