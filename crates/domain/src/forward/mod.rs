// Forward rules and their backend-native renderings (pf directives, netfilter selectors)
pub mod directive;
pub mod entity;
pub mod error;
pub mod selector;
